//! Experiment directories.
//!
//! Every run writes its session logs into a fresh `expNNN` directory under
//! the configured destination, so repeated runs never mix their logs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

const MAX_EXPERIMENTS: u32 = 999;

/// Create the first free `base/expNNN` (`exp001`..=`exp999`).
///
/// Falls back to `base` itself when every slot is taken.
pub fn create_experiment_dir(base: &Path) -> Result<PathBuf> {
    for id in 1..=MAX_EXPERIMENTS {
        let dir = base.join(format!("exp{id:03}"));
        if dir.exists() {
            continue;
        }
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        return Ok(dir);
    }

    warn!(
        "No free experiment directory under {}, writing logs there directly",
        base.display()
    );
    Ok(base.to_path_buf())
}
