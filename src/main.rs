//! Entry point for the `wfs-verify` binary.

use std::{
    io::{self, Write},
    process::ExitCode,
};

use anyhow::{Context, Result};
use cli_defs::VerifyConfig;
use ortho_config::OrthoConfig;
use tracing_subscriber::EnvFilter;
use wfs_verify::runner::{self, ReportFormat};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = VerifyConfig::load_from_iter(std::env::args_os())?;
    let format: ReportFormat = config.format.parse()?;
    let report = runner::run(&config).await?;

    let mut stdout = io::stdout().lock();
    stdout
        .write_all(runner::render(&report, format)?.as_bytes())
        .context("writing report")?;
    stdout.flush().context("writing report")?;

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
