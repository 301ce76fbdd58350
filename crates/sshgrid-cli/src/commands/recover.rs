//! `sshgrid recover etcd`

use std::path::Path;

use anyhow::Result;
use sshgrid_ops::{Context, RecoverRequest, Recovery};

use super::print_report;

pub fn etcd(ctx: &Context, snapshot: &Path) -> Result<()> {
    let report = Recovery::new(ctx).recover(RecoverRequest {
        snapshot: snapshot.to_path_buf(),
    })?;
    if report.completed.is_empty() {
        println!("No master machines; nothing to recover");
        return Ok(());
    }
    println!("✓ Recovered etcd from {}", snapshot.display());
    print_report(&report);
    Ok(())
}
