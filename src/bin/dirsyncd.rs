//! src/bin/dirsyncd.rs

#![deny(unsafe_code)]

use std::process::ExitCode;

fn main() -> ExitCode {
    dirsyncd_app::run()
}
