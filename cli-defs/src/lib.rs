//! Shared CLI type definitions for wfs-verify build and runtime.
//!
//! The `build.rs` script renders a man page from [`Cli`], while the runtime
//! loads [`VerifyConfig`] through `OrthoConfig` so defaults, configuration
//! files, `WFS_VERIFY_*` environment variables and command-line flags are
//! merged in that order.

// File-wide suppressions: Clap and OrthoConfig derive macros inject generated
// code throughout the module.
#![expect(
    non_snake_case,
    reason = "Clap/OrthoConfig derive macros generate helper modules with uppercase names"
)]
#![expect(
    missing_docs,
    reason = "OrthoConfig and Clap derive macros generate items that cannot be documented"
)]

use clap::{Args, Parser};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

/// Default per-dispatch network timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Default wall-clock budget for a single test case in seconds.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 600;
/// Default expiry requested when probing lock expiry, in seconds.
pub const DEFAULT_LOCK_EXPIRY_SECS: u64 = 30;
/// Default grace period added after a lock's expiry before probing it.
pub const DEFAULT_EXPIRY_BUFFER_SECS: u64 = 4;
/// Default paging window used by cursor walks.
pub const DEFAULT_PAGE_WINDOW: u32 = 1;
/// Default number of feature ids sampled per feature type.
pub const DEFAULT_SAMPLE_SIZE: u32 = 10;
/// Default seed for feature selection.
pub const DEFAULT_SEED: u64 = 0x5EED;

/// Runtime configuration for a verification run.
#[derive(Args, OrthoConfig, Serialize, Deserialize, Default, Debug, Clone)]
#[ortho_config(prefix = "WFS_VERIFY_")]
pub struct VerifyConfig {
    /// URL of the capabilities document (or the service endpoint).
    #[arg(long)]
    pub capabilities_url: Option<String>,
    /// Local capabilities document used instead of fetching one.
    #[arg(long)]
    pub capabilities_file: Option<String>,
    /// Network timeout applied to every dispatch, in seconds.
    #[ortho_config(default = DEFAULT_REQUEST_TIMEOUT_SECS)]
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,
    /// Upper bound on a single test case, sleeps included, in seconds.
    #[ortho_config(default = DEFAULT_RUN_TIMEOUT_SECS)]
    #[arg(long, default_value_t = DEFAULT_RUN_TIMEOUT_SECS)]
    pub run_timeout_secs: u64,
    /// Expiry requested by the lock expiry probe, in seconds.
    #[ortho_config(default = DEFAULT_LOCK_EXPIRY_SECS)]
    #[arg(long, default_value_t = DEFAULT_LOCK_EXPIRY_SECS)]
    pub lock_expiry_secs: u64,
    /// Extra wait after a lock's expiry before it is probed, in seconds.
    #[ortho_config(default = DEFAULT_EXPIRY_BUFFER_SECS)]
    #[arg(long, default_value_t = DEFAULT_EXPIRY_BUFFER_SECS)]
    pub expiry_buffer_secs: u64,
    /// Window size used when walking paged results.
    #[ortho_config(default = DEFAULT_PAGE_WINDOW)]
    #[arg(long, default_value_t = DEFAULT_PAGE_WINDOW)]
    pub page_window: u32,
    /// Maximum number of feature ids sampled per feature type.
    #[ortho_config(default = DEFAULT_SAMPLE_SIZE)]
    #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
    pub sample_size: u32,
    /// Seed for reproducible feature selection.
    #[ortho_config(default = DEFAULT_SEED)]
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,
    /// SOAP version used by the SOAP binding (`1.1` or `1.2`).
    #[ortho_config(default = "1.2".to_owned())]
    #[arg(long, default_value_t = String::from("1.2"))]
    pub soap_version: String,
    /// Comma-separated conformance classes to run; empty runs all.
    #[arg(long)]
    pub only: Option<String>,
    /// Report format (`text` or `json`).
    #[ortho_config(default = "text".to_owned())]
    #[arg(long, default_value_t = String::from("text"))]
    pub format: String,
}

/// Top-level CLI entry point consumed by the binary and the man page build.
#[derive(Parser, Deserialize, Serialize, Debug, Clone)]
#[command(name = "wfs-verify", about = "Verify stateful WFS 2.0 operations")]
pub struct Cli {
    /// Verification configuration.
    #[command(flatten)]
    pub config: VerifyConfig,
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use figment::Jail;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn env_config_loading() {
        Jail::expect_with(|j| {
            j.set_env("WFS_VERIFY_CAPABILITIES_URL", "http://iut.test/wfs");
            j.set_env("WFS_VERIFY_LOCK_EXPIRY_SECS", "45");
            let cfg = VerifyConfig::load_from_iter(["wfs-verify"]).expect("load");
            assert_eq!(cfg.capabilities_url.as_deref(), Some("http://iut.test/wfs"));
            assert_eq!(cfg.lock_expiry_secs, 45);
            Ok(())
        });
    }

    #[rstest]
    fn cli_overrides_env() {
        Jail::expect_with(|j| {
            j.set_env("WFS_VERIFY_SEED", "7");
            let cfg = VerifyConfig::load_from_iter(["wfs-verify", "--seed", "11"]).expect("load");
            assert_eq!(cfg.seed, 11);
            Ok(())
        });
    }

    #[rstest]
    fn defaults_apply_without_overrides() {
        Jail::expect_with(|_j| {
            let cfg = VerifyConfig::load_from_iter(["wfs-verify"]).expect("load");
            assert_eq!(cfg.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
            assert_eq!(cfg.page_window, DEFAULT_PAGE_WINDOW);
            assert_eq!(cfg.soap_version, "1.2");
            assert!(cfg.only.is_none());
            Ok(())
        });
    }
}
