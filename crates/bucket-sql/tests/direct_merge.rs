//! Direct-attach merge tests.
//!
//! Every direct merge is checked against the in-memory merge engine over
//! the same inputs; only provenance may differ between the two.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bucket_core::{
    Axis, BucketHitRow, CoverGroup, CoverNode, CoverPoint, CoverageError, Goal, PointHitRow,
    Reader, Readout, Recorder, TableReadout, Writer, merge_readouts,
};
use bucket_sql::{SqlAccessor, SqlError, SqlMergeOptions, merge_sql_direct, merge_sql_files};

fn tree() -> CoverNode {
    CoverGroup::new("top", "")
        .with(
            CoverPoint::new("p", "")
                .with_axis(Axis::new("x", "").with_values(["a", "b"]).unwrap())
                .unwrap(),
        )
        .unwrap()
        .with(
            CoverGroup::new("inner", "").with(
                CoverPoint::new("q", "")
                    .with_axis(Axis::new("y", "").with_values([1, 2, 3]).unwrap())
                    .unwrap()
                    .with_goal(Goal::target("TWICE", 2, "").unwrap())
                    .unwrap()
                    .with_goal(Goal::ignore("SKIP", ""))
                    .unwrap()
                    .with_classifier(|b| match b.get("y") {
                        Some("1") => Some("twice".into()),
                        Some("3") => Some("skip".into()),
                        _ => None,
                    }),
            )
            .unwrap(),
        )
        .unwrap()
        .into()
}

fn other_tree() -> CoverNode {
    CoverPoint::new("p", "")
        .with_axis(Axis::new("x", "").with_values(["a", "b", "c"]).unwrap())
        .unwrap()
        .into()
}

fn readout(root: CoverNode, hits: &[u64], ctx: &str) -> TableReadout {
    let mut rec = Recorder::new(root).unwrap().with_source("test", "");
    rec.set_hits(hits).unwrap();
    rec.readout(ctx).unwrap()
}

fn write_db(dir: &Path, name: &str, readouts: &[TableReadout]) -> PathBuf {
    let path = dir.join(name);
    let store = SqlAccessor::open(&path).unwrap();
    for r in readouts {
        store.write(r).unwrap();
    }
    path
}

fn hit_tables(readout: &dyn Readout) -> (Vec<PointHitRow>, Vec<BucketHitRow>) {
    (
        readout.point_hits(0, None).unwrap(),
        readout.bucket_hits(0, None).unwrap(),
    )
}

fn read_single(path: &Path) -> TableReadout {
    let store = SqlAccessor::open(path).unwrap();
    let runs = store.read_all().unwrap();
    assert_eq!(runs.len(), 1);
    TableReadout::snapshot(&runs[0]).unwrap()
}

// ── Direct merges ──────────────────────────────────────────────────

#[tokio::test]
async fn direct_merge_matches_in_memory_engine() {
    let dir = tempfile::tempdir().unwrap();
    let a = readout(tree(), &[3, 0, 1, 4, 2], "ctx");
    let b = readout(tree(), &[3, 12, 0, 0, 9], "ctx");
    let inputs = vec![
        write_db(dir.path(), "a.db", &[a.clone()]),
        write_db(dir.path(), "b.db", &[b.clone()]),
    ];
    let output = dir.path().join("merged.db");

    let run = merge_sql_direct(&output, &inputs, &SqlMergeOptions::default())
        .await
        .unwrap();
    assert_eq!(run, 1);

    let merged = read_single(&output);
    let expected = merge_readouts([&a as &dyn Readout, &b]).unwrap();
    assert_eq!(merged.definition, expected.definition);
    assert_eq!(merged.rec_sha, "ctx");
    assert_eq!(hit_tables(&merged), hit_tables(&expected));
}

#[tokio::test]
async fn merged_hits_are_capped_at_the_goal_target() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        write_db(dir.path(), "a.db", &[readout(other_tree(), &[3, 8, 0], "c")]),
        write_db(dir.path(), "b.db", &[readout(other_tree(), &[3, 8, 0], "c")]),
    ];
    let output = dir.path().join("merged.db");
    merge_sql_direct(&output, &inputs, &SqlMergeOptions::default())
        .await
        .unwrap();

    let merged = read_single(&output);
    let raw: Vec<u64> = merged.bucket_hits.iter().map(|h| h.hits).collect();
    assert_eq!(raw, vec![6, 16, 0]);
    let point = merged.point_hits[0];
    assert_eq!(point.hits, 6 + 10);
    assert_eq!(point.hit_buckets, 2);
    assert_eq!(point.full_buckets, 1);
}

#[tokio::test]
async fn every_run_of_an_input_is_merged() {
    let dir = tempfile::tempdir().unwrap();
    let runs = [
        readout(tree(), &[1, 0, 0, 0, 0], "ctx"),
        readout(tree(), &[0, 2, 0, 0, 0], "ctx"),
    ];
    let inputs = vec![
        write_db(dir.path(), "both.db", &runs),
        write_db(dir.path(), "one.db", &[readout(tree(), &[0, 0, 3, 0, 0], "ctx")]),
    ];
    let output = dir.path().join("merged.db");
    merge_sql_direct(&output, &inputs, &SqlMergeOptions::default().with_source("nightly"))
        .await
        .unwrap();

    let merged = read_single(&output);
    assert_eq!(merged.source, "nightly");
    let raw: Vec<u64> = merged.bucket_hits.iter().map(|h| h.hits).collect();
    assert_eq!(raw, vec![1, 2, 3, 0, 0]);
}

#[tokio::test]
async fn default_source_is_timestamped() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![write_db(dir.path(), "a.db", &[readout(tree(), &[0; 5], "ctx")])];
    let output = dir.path().join("merged.db");
    merge_sql_direct(&output, &inputs, &SqlMergeOptions::default())
        .await
        .unwrap();
    assert!(read_single(&output).source.starts_with("Merged_"));
}

// ── Failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn incompatible_definition_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        write_db(dir.path(), "a.db", &[readout(tree(), &[1, 0, 0, 0, 0], "ctx")]),
        write_db(dir.path(), "b.db", &[readout(other_tree(), &[1, 0, 0], "ctx")]),
    ];
    let output = dir.path().join("merged.db");
    let err = merge_sql_direct(&output, &inputs, &SqlMergeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SqlError::Coverage(CoverageError::IncompatibleDefinition { .. })
    ));
    assert!(!output.exists());
    assert!(!dir.path().join(".merged.db.partial").exists());
}

#[tokio::test]
async fn incompatible_context_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        write_db(dir.path(), "a.db", &[readout(tree(), &[0; 5], "linux")]),
        write_db(dir.path(), "b.db", &[readout(tree(), &[0; 5], "windows")]),
    ];
    let output = dir.path().join("merged.db");
    let err = merge_sql_direct(&output, &inputs, &SqlMergeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SqlError::Coverage(CoverageError::IncompatibleContext { .. })
    ));
    assert!(!output.exists());
}

#[tokio::test]
async fn no_inputs_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = merge_sql_direct(&dir.path().join("out.db"), &[], &SqlMergeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SqlError::Coverage(CoverageError::NoInputs)));
}

// ── Batching ───────────────────────────────────────────────────────

fn numbered_inputs(dir: &Path, count: u64) -> Vec<PathBuf> {
    std::fs::create_dir_all(dir).unwrap();
    (0..count)
        .map(|i| {
            let hits = [i % 4, (i * 7) % 5, i % 2, (i * 3) % 11, 1];
            write_db(dir, &format!("in-{i:02}.db"), &[readout(tree(), &hits, "ctx")])
        })
        .collect()
}

#[tokio::test]
async fn batching_does_not_change_the_result() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = numbered_inputs(dir.path(), 25);

    let reference = merge_sql_files(&inputs).unwrap().finish().unwrap();

    for max_attach in [3, 9] {
        let output = dir.path().join(format!("merged-{max_attach}.db"));
        let options = SqlMergeOptions::default()
            .with_max_attach(max_attach)
            .with_workers(2);
        merge_sql_direct(&output, &inputs, &options).await.unwrap();
        let merged = read_single(&output);
        assert_eq!(merged.definition, reference.definition);
        assert_eq!(hit_tables(&merged), hit_tables(&reference), "max_attach {max_attach}");
    }
}

#[tokio::test]
async fn smallest_attach_limit_terminates() {
    let dir = tempfile::tempdir().unwrap();
    // Three inputs fit one attach of three; four force the first batch level.
    for (count, max_attach) in [(3, 3), (4, 3), (5, 3), (4, 2)] {
        let inputs = numbered_inputs(&dir.path().join(format!("set-{count}-{max_attach}")), count);
        let reference = merge_sql_files(&inputs).unwrap().finish().unwrap();
        let output = dir.path().join(format!("merged-{count}-{max_attach}.db"));
        let options = SqlMergeOptions::default()
            .with_max_attach(max_attach)
            .with_workers(2);
        tokio::time::timeout(
            Duration::from_secs(60),
            merge_sql_direct(&output, &inputs, &options),
        )
        .await
        .expect("merge did not finish")
        .unwrap();
        assert_eq!(
            hit_tables(&read_single(&output)),
            hit_tables(&reference),
            "{count} inputs at max_attach {max_attach}"
        );
    }
}

// ── In-memory driver ───────────────────────────────────────────────

#[test]
fn file_merge_reads_every_run() {
    let dir = tempfile::tempdir().unwrap();
    let first = [
        readout(tree(), &[1, 1, 0, 0, 0], "ctx"),
        readout(tree(), &[1, 0, 0, 0, 0], "ctx"),
    ];
    let inputs = vec![
        write_db(dir.path(), "a.db", &first),
        write_db(dir.path(), "b.db", &[readout(tree(), &[0, 0, 0, 5, 0], "ctx")]),
    ];
    let merged = merge_sql_files(&inputs).unwrap();
    assert_eq!(merged.merged(), 3);
    let table = merged.with_source("combined").finish().unwrap();
    assert_eq!(table.source, "combined");
    let raw: Vec<u64> = table.bucket_hits.iter().map(|h| h.hits).collect();
    assert_eq!(raw, vec![2, 1, 0, 5, 0]);
}

#[test]
fn file_merge_rejects_mixed_definitions() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        write_db(dir.path(), "a.db", &[readout(tree(), &[0; 5], "ctx")]),
        write_db(dir.path(), "b.db", &[readout(other_tree(), &[0; 3], "ctx")]),
    ];
    assert!(matches!(
        merge_sql_files(&inputs),
        Err(SqlError::Coverage(CoverageError::IncompatibleDefinition { .. }))
    ));
}
