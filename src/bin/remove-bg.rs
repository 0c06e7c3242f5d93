//! Background removal filter: `remove-bg < input.jpg > output.png`

use std::process::ExitCode;

#[cfg(feature = "cli")]
fn main() -> ExitCode {
    bgremove_filter::cli::main()
}

#[cfg(not(feature = "cli"))]
fn main() -> ExitCode {
    bgremove_filter::filter::run()
}
