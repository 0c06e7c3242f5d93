//! Stdin to stdout filter
//!
//! Reads one encoded image from the input stream, removes its background and
//! writes the PNG result to the output stream. Output is written only after
//! the input is fully read and the removal succeeded; otherwise a single
//! `Error: <message>` line goes to the diagnostic stream.

use crate::{
    error::BgRemovalError,
    remover::{BackgroundRemover, DefaultRemover},
};
use std::io::{self, Read, Write};
use std::process::ExitCode;
use thiserror::Error;

/// Outcome of one filter run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    /// Output written, exit status 0
    Success,
    /// Diagnostic written, exit status 1
    Failure,
}

impl FilterStatus {
    /// Process exit status
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
        }
    }
}

impl From<FilterStatus> for ExitCode {
    fn from(status: FilterStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Reasons a filter run fails
#[derive(Error, Debug)]
pub enum FilterError {
    /// Input stream was empty
    #[error("No input data received")]
    EmptyInput,

    /// Input stream could not be read
    #[error("Failed to read input: {0}")]
    ReadInput(#[source] io::Error),

    /// Background removal failed
    #[error(transparent)]
    Removal(#[from] BgRemovalError),

    /// Output stream could not be written or flushed
    #[error("Failed to write output: {0}")]
    WriteOutput(#[source] io::Error),
}

/// Run the filter on the process standard streams with the default remover
#[must_use]
pub fn run() -> ExitCode {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let stderr = io::stderr();

    run_with(stdin.lock(), stdout.lock(), stderr.lock(), DefaultRemover).into()
}

/// Run the filter on arbitrary streams and remover
pub fn run_with<I, O, D, R>(
    mut input: I,
    mut output: O,
    mut diagnostics: D,
    mut remover: R,
) -> FilterStatus
where
    I: Read,
    O: Write,
    D: Write,
    R: BackgroundRemover,
{
    match filter(&mut input, &mut output, &mut remover) {
        Ok(bytes_written) => {
            tracing::debug!(bytes_written, "Filter completed");
            FilterStatus::Success
        },
        Err(err) => {
            tracing::debug!(error = ?err, "Filter failed");
            // Nowhere left to report a failing diagnostic stream
            let _ = writeln!(diagnostics, "Error: {err}");
            let _ = diagnostics.flush();
            FilterStatus::Failure
        },
    }
}

fn filter<I, O, R>(input: &mut I, output: &mut O, remover: &mut R) -> Result<usize, FilterError>
where
    I: Read,
    O: Write,
    R: BackgroundRemover,
{
    let mut buffer = Vec::new();
    input
        .read_to_end(&mut buffer)
        .map_err(FilterError::ReadInput)?;

    if buffer.is_empty() {
        return Err(FilterError::EmptyInput);
    }
    tracing::debug!(bytes_read = buffer.len(), "Input received");

    let png = remover.remove(&buffer)?;

    output
        .write_all(&png)
        .and_then(|()| output.flush())
        .map_err(FilterError::WriteOutput)?;

    Ok(png.len())
}
