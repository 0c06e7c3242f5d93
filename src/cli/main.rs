//! `remove-bg`: image bytes on stdin, PNG with a transparent background on stdout

use crate::{filter, tracing_config::TracingConfig};
use clap::Parser;
use std::process::ExitCode;

/// Remove the background from an image read on stdin and write a PNG to stdout
///
/// Model location and backend are taken from the `BGREMOVE_*` environment
/// variables; set `RUST_LOG` to enable diagnostics on stderr.
#[derive(Parser, Debug)]
#[command(name = "remove-bg", author, version, about, long_about = None)]
#[command(after_help = "Usage example: remove-bg < input.jpg > output.png")]
pub struct Cli {}

/// Parse arguments, set up tracing and run the filter
#[must_use]
pub fn main() -> ExitCode {
    let _cli = Cli::parse();

    // An unusable RUST_LOG leaves logging off; stderr is reserved for the error line
    if TracingConfig::from_env().init().is_err() {
        tracing::debug!("Tracing subscriber not installed");
    }

    filter::run()
}
