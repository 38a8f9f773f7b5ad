//! Build script for man page generation.
//!
//! Renders a man page for the `wfs-verify` binary using `clap_mangen`. The CLI
//! definitions come from the `cli-defs` crate so build-time and runtime
//! consumers share one source of truth.

use std::{env, fs, io, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;
use cli_defs::Cli;

fn main() -> io::Result<()> {
    println!("cargo::rerun-if-changed=cli-defs");

    let Ok(dir) = env::var("OUT_DIR") else {
        // Cargo does not set OUT_DIR for IDE analysis runs.
        return Ok(());
    };
    let out_dir = PathBuf::from(dir);
    let bin_name = env::var("CARGO_PKG_NAME").unwrap_or_else(|_| "wfs-verify".into());

    let man = Man::new(Cli::command());
    let mut file = fs::File::create(out_dir.join(format!("{bin_name}.1")))?;
    man.render(&mut file)?;

    Ok(())
}
