pub mod extract_cmd;
pub mod poller;
pub mod run_cmd;
pub mod telegram;
pub mod whitelist_cmd;

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use checkgate_core::config::Config;
use checkgate_core::config::find_checkgate_home;

/// Resolve the home directory, load `.env` files and read `config.toml`.
///
/// A `.env` in the working directory is read first, then one in the home;
/// variables already set in the environment always win.
pub fn load_config(home_override: Option<PathBuf>) -> Result<Config> {
    let home = match home_override {
        Some(home) => home,
        None => find_checkgate_home().context("failed to resolve CHECKGATE_HOME")?,
    };
    load_dotenv(&home);
    Config::load(&home).with_context(|| format!("failed to load config from {}", home.display()))
}

fn load_dotenv(home: &Path) {
    match dotenvy::dotenv() {
        Err(err) if !err.not_found() => tracing::warn!(error = %err, "failed to read .env"),
        _ => {}
    }
    let home_env = home.join(".env");
    match dotenvy::from_path(&home_env) {
        Err(err) if !err.not_found() => {
            tracing::warn!(error = %err, path = %home_env.display(), "failed to read .env");
        }
        _ => {}
    }
}
