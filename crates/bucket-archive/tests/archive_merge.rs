//! Archive merge driver tests.

use std::path::{Path, PathBuf};

use bucket_core::{
    Axis, CoverGroup, CoverNode, CoverPoint, CoverageError, Goal, Reader, Readout, Recorder,
    TableReadout, Writer, merge_readouts,
};
use bucket_archive::{ArchiveAccessor, ArchiveError, ArchiveMergeOptions, merge_archives};

fn tree() -> CoverNode {
    CoverGroup::new("top", "")
        .with(
            CoverPoint::new("size", "")
                .with_axis(Axis::new("n", "").with_range(0, 9).unwrap().with_range(10, 99).unwrap())
                .unwrap()
                .with_axis(Axis::new("kind", "").with_values(["rd", "wr"]).unwrap())
                .unwrap()
                .with_goal(Goal::target("ONCE", 1, "").unwrap())
                .unwrap()
                .with_classifier(|b| (b.get("kind") == Some("wr")).then(|| "once".into())),
        )
        .unwrap()
        .with(CoverPoint::new("flag", ""))
        .unwrap()
        .into()
}

fn recorded(hits: &[u64], ctx: &str) -> TableReadout {
    let mut rec = Recorder::new(tree()).unwrap();
    rec.set_hits(hits).unwrap();
    rec.readout(ctx).unwrap()
}

fn archive(dir: &Path, name: &str, readouts: &[&TableReadout]) -> PathBuf {
    let path = dir.join(name);
    let accessor = ArchiveAccessor::new(&path);
    for r in readouts {
        accessor.write(*r).unwrap();
    }
    path
}

fn read_single(path: &Path) -> TableReadout {
    let runs = ArchiveAccessor::new(path).read_all().unwrap();
    assert_eq!(runs.len(), 1);
    TableReadout::snapshot(&runs[0]).unwrap()
}

#[tokio::test]
async fn archive_merge_matches_in_memory_engine() {
    let dir = tempfile::tempdir().unwrap();
    let a = recorded(&[1, 4, 0, 2, 7], "ctx");
    let b = recorded(&[12, 0, 3, 0, 1], "ctx");
    let c = recorded(&[0, 0, 0, 5, 0], "ctx");
    let inputs = vec![
        archive(dir.path(), "a", &[&a, &b]),
        archive(dir.path(), "c", &[&c]),
    ];
    let output = dir.path().join("merged");
    let options = ArchiveMergeOptions::default()
        .with_source("weekly")
        .with_source_key("7");
    let reference = merge_archives(&output, &inputs, &options).await.unwrap();
    assert_eq!(reference, 0);

    let merged = read_single(&output);
    let expected = merge_readouts([&a as &dyn Readout, &b, &c]).unwrap();
    assert_eq!(merged.definition, expected.definition);
    assert_eq!(merged.point_hits, expected.point_hits);
    assert_eq!(merged.bucket_hits, expected.bucket_hits);
    assert_eq!((merged.source.as_str(), merged.source_key.as_str()), ("weekly", "7"));
}

#[tokio::test]
async fn batched_merge_matches_unbatched() {
    let dir = tempfile::tempdir().unwrap();
    let inputs: Vec<PathBuf> = (0..13u64)
        .map(|i| {
            let hits = [i % 3, i % 2, (i * 5) % 7, 1, i];
            archive(dir.path(), &format!("in-{i:02}"), &[&recorded(&hits, "ctx")])
        })
        .collect();

    let flat = dir.path().join("flat");
    merge_archives(&flat, &inputs, &ArchiveMergeOptions::default())
        .await
        .unwrap();
    let flat = read_single(&flat);

    for (threshold, size) in [(4, None), (3, Some(2)), (1, None)] {
        let output = dir.path().join(format!("batched-{threshold}"));
        let mut options = ArchiveMergeOptions::default()
            .with_batch_threshold(threshold)
            .with_workers(3);
        if let Some(size) = size {
            options = options.with_batch_size(size);
        }
        merge_archives(&output, &inputs, &options).await.unwrap();
        let batched = read_single(&output);
        assert_eq!(batched.bucket_hits, flat.bucket_hits);
        assert_eq!(batched.point_hits, flat.point_hits);
    }
}

#[tokio::test]
async fn smallest_threshold_reduces_to_one_input() {
    let dir = tempfile::tempdir().unwrap();
    for count in 1..=5u64 {
        let records: Vec<TableReadout> =
            (0..count).map(|i| recorded(&[i, 1, 0, 0, 2], "ctx")).collect();
        let inputs: Vec<PathBuf> = records
            .iter()
            .enumerate()
            .map(|(i, r)| archive(dir.path(), &format!("set{count}-{i}"), &[r]))
            .collect();
        let expected = merge_readouts(records.iter().map(|r| r as &dyn Readout)).unwrap();

        let output = dir.path().join(format!("merged-{count}"));
        let options = ArchiveMergeOptions::default().with_batch_threshold(1);
        merge_archives(&output, &inputs, &options).await.unwrap();
        let merged = read_single(&output);
        assert_eq!(merged.bucket_hits, expected.bucket_hits, "{count} inputs");
        assert_eq!(merged.point_hits, expected.point_hits, "{count} inputs");
    }
}

#[tokio::test]
async fn mismatched_archive_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let other: CoverNode = CoverPoint::new("flag", "").into();
    let stray = Recorder::new(other).unwrap().readout("ctx").unwrap();
    let inputs = vec![
        archive(dir.path(), "a", &[&recorded(&[1, 0, 0, 0, 0], "ctx")]),
        archive(dir.path(), "b", &[&stray]),
    ];
    let output = dir.path().join("merged");
    let err = merge_archives(&output, &inputs, &ArchiveMergeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::Coverage(CoverageError::IncompatibleDefinition { .. })
    ));
    assert!(!output.exists());
    assert!(!dir.path().join(".merged.partial").exists());
}

#[tokio::test]
async fn context_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        archive(dir.path(), "a", &[&recorded(&[0; 5], "gcc")]),
        archive(dir.path(), "b", &[&recorded(&[0; 5], "clang")]),
    ];
    let err = merge_archives(&dir.path().join("out"), &inputs, &ArchiveMergeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::Coverage(CoverageError::IncompatibleContext { .. })
    ));
}

#[tokio::test]
async fn archive_without_records_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty");
    std::fs::create_dir(&empty).unwrap();
    let inputs = vec![archive(dir.path(), "a", &[&recorded(&[0; 5], "ctx")]), empty];
    let err = merge_archives(&dir.path().join("out"), &inputs, &ArchiveMergeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Coverage(CoverageError::Malformed(_))));
}

#[tokio::test]
async fn existing_output_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![archive(dir.path(), "a", &[&recorded(&[2, 0, 0, 0, 0], "ctx")])];
    let output = archive(dir.path(), "out", &[&recorded(&[9; 5], "ctx")]);
    merge_archives(&output, &inputs, &ArchiveMergeOptions::default())
        .await
        .unwrap();
    assert_eq!(read_single(&output).bucket_hits[0].hits, 2);
}
