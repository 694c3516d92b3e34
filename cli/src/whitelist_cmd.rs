use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use checkgate_core::config::Config;
use checkgate_core::report::render_whitelist_csv;
use checkgate_core::store::Stores;
use clap::Parser;

/// Render the whitelist as CSV.
#[derive(Debug, Parser)]
pub struct WhitelistCli {
    /// Output file (defaults to stdout when omitted).
    #[arg(long = "out", value_name = "PATH")]
    out: Option<PathBuf>,
}

pub fn run(cli: WhitelistCli, config: &Config) -> Result<()> {
    let stores = Stores::load(&config.data_dir);
    let mut users = stores.whitelist.list_all();
    let missing = stores.missing_submitters();
    if !missing.is_empty() {
        tracing::warn!(
            missing = missing.len(),
            "whitelist lacks registered submitters; listing them too (the bot restores them on start)"
        );
        users.extend(missing);
    }
    let csv = render_whitelist_csv(&users);

    match cli.out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create report directory at {}", parent.display())
                })?;
            }
            fs::write(&path, &csv)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Whitelist written to {} ({} users)", path.display(), users.len());
        }
        None => {
            std::io::stdout()
                .write_all(csv.as_bytes())
                .context("failed to write report to stdout")?;
        }
    }
    Ok(())
}
