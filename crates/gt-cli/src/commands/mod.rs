pub mod config;
pub mod run;
pub mod score;

use std::path::Path;

use anyhow::Context;
use gt_core::config::Config;

/// Load the config from `path`, or from the default location when none is
/// given (falling back to built-in defaults if that file does not exist).
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Config::load().context("failed to load config"),
    }
}
