use std::path::Path;

use anyhow::Result;

use hlsim::{summarize, ReportFormat};

pub fn cmd_report(dir: &Path, format: ReportFormat, bin: f64) -> Result<()> {
    let summary = summarize(dir, bin)?;
    print!("{}", summary.render(format)?);
    Ok(())
}
