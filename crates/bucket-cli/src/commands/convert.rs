use anyhow::Result;
use bucket_core::Readout;
use tracing::info;

use super::{StoreLocation, read_store, write_store};

pub fn convert(from: &StoreLocation, to: &StoreLocation) -> Result<()> {
    let readouts = read_store(from)?;
    if readouts.is_empty() {
        anyhow::bail!("{from} holds no records");
    }
    for readout in &readouts {
        let reference = write_store(to, readout.as_ref())?;
        info!(%from, %to, %reference, def_sha = %readout.def_sha(), "record converted");
    }
    println!("✓ Copied {} records from {from} to {to}", readouts.len());
    Ok(())
}
