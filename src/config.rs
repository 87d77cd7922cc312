//! Configuration (C14, §10.3): layered `RunOptions` defaulting — code
//! defaults, optional config-file layer, then explicit caller overrides.
//! Gated behind the `config` feature, mirroring the teacher crate's own
//! `config` feature gating `dep:config`.
//!
//! This is ambient convenience for embedding binaries/test harnesses;
//! the engine itself never reads a file or environment variable mid-run.

use std::time::Duration;

use serde::Deserialize;

use crate::executor::RunOptions;

/// Caller-supplied overrides; `None` means "defer to the file layer, then
/// to the code default" for that field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunOptionsOverrides {
    pub max_concurrency: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub max_iterations: Option<u64>,
    pub halt_timeout_ms: Option<u64>,
    pub async_allowed: Option<bool>,
}

/// Build a `RunOptions` by layering `overrides` over an optional config
/// file (`toml`/`json`/`yaml`, resolved by `config::File::with_name`'s
/// extension sniffing) over the hardcoded `RunOptions::default()`.
pub fn layered_run_options(
    config_path: Option<&str>,
    overrides: RunOptionsOverrides,
) -> Result<RunOptions, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = config_path {
        builder = builder.add_source(config::File::with_name(path).required(false));
    }
    let settings = builder.build()?;
    let file: RunOptionsOverrides = settings.try_deserialize().unwrap_or_default();
    let defaults = RunOptions::default();

    Ok(RunOptions {
        max_concurrency: overrides.max_concurrency.or(file.max_concurrency).unwrap_or(defaults.max_concurrency),
        timeout: overrides
            .timeout_ms
            .or(file.timeout_ms)
            .map(Duration::from_millis)
            .or(defaults.timeout),
        max_iterations: overrides.max_iterations.or(file.max_iterations).or(defaults.max_iterations),
        halt_timeout: overrides
            .halt_timeout_ms
            .or(file.halt_timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.halt_timeout),
        async_allowed: overrides.async_allowed.or(file.async_allowed).unwrap_or(defaults.async_allowed),
        concurrency_key: defaults.concurrency_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_config_file_falls_back_to_defaults() {
        let options = layered_run_options(None, RunOptionsOverrides::default()).unwrap();
        assert_eq!(options.halt_timeout, Duration::from_millis(5000));
        assert!(options.async_allowed);
    }

    #[test]
    fn explicit_override_wins_over_default() {
        let overrides = RunOptionsOverrides {
            async_allowed: Some(false),
            ..Default::default()
        };
        let options = layered_run_options(None, overrides).unwrap();
        assert!(!options.async_allowed);
    }
}
