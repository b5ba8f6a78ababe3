//! `bucket info`: summarise every record of a store.

use anyhow::Result;
use bucket_core::{CoverageView, PointView, Readout};

use super::{StoreLocation, read_store};

pub fn info(store: &StoreLocation, all: bool) -> Result<()> {
    let readouts = read_store(store)?;
    println!("{store}: {} records", readouts.len());
    for (i, readout) in readouts.iter().enumerate() {
        println!();
        println!("record {i}");
        println!("  definition  {}", readout.def_sha());
        println!("  context     {}", readout.rec_sha());
        println!("  source      {}", readout.source());
        if !readout.source_key().is_empty() {
            println!("  source key  {}", readout.source_key());
        }
        let view = CoverageView::load(readout.as_ref())?;
        if all {
            for point in view.points() {
                print_point(&point);
            }
        } else if let Some(root) = view.root() {
            print_point(&root);
            for child in root.children() {
                print_point(&child);
            }
        }
    }
    Ok(())
}

fn print_point(point: &PointView<'_>) {
    let row = point.row();
    let hits = point.hits();
    println!(
        "  {:indent$}{:<24} hits {:>6}/{:<6} ({:>5.1}%)  buckets {:>4}/{:<4} ({:>5.1}%)",
        "",
        point.name(),
        hits.hits,
        row.target,
        point.hit_ratio() * 100.0,
        hits.full_buckets,
        row.target_buckets,
        point.bucket_ratio() * 100.0,
        indent = row.depth * 2,
    );
}
