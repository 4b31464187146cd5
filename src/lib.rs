//! src/lib.rs
//!
//! Thin glue between the CLI surface and `sync_core`: argument parsing,
//! logging setup, local IP detection, and the `notify`-backed event source.
//! The binary crate owns every concern `sync_core` deliberately stays
//! agnostic about.

pub mod cli;
pub mod local_ip;
pub mod logging;
pub mod watcher;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use sync_core::{Clock, Supervisor, SystemClock};

use crate::cli::Args;
use crate::watcher::NotifyEvents;

/// Parse arguments, wire up a supervisor, and run until the filesystem
/// watcher closes (normally: never, until the process is killed).
#[must_use]
pub fn run() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose, args.log_format);

    let local_ip = match args.advertise_ip {
        Some(ip) => ip,
        None => match local_ip::detect() {
            Ok(ip) => ip,
            Err(e) => {
                error!(error = %e, "could not detect a local IP address to advertise");
                return ExitCode::FAILURE;
            }
        },
    };

    let monitored_dir = args.monitored_dir.clone();
    let config = args.into_config();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let supervisor = match Supervisor::new(config, local_ip, clock) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start");
            return ExitCode::FAILURE;
        }
    };

    info!(peer = %supervisor.local_id(), dir = %monitored_dir.display(), "dirsyncd starting");

    supervisor.start_discovery();
    if let Err(e) = supervisor.start_accept_loop() {
        error!(error = %e, "failed to bind listen socket");
        return ExitCode::FAILURE;
    }
    spawn_ignore_sweeper(&supervisor);

    let events = match NotifyEvents::new(&monitored_dir) {
        Ok(events) => events,
        Err(e) => {
            error!(error = %e, "failed to start filesystem watcher");
            supervisor.shutdown();
            return ExitCode::FAILURE;
        }
    };

    supervisor.run_event_router(&events);
    supervisor.shutdown();
    ExitCode::SUCCESS
}

/// Sweep the ignore set on a fixed, short interval for the lifetime of the
/// process. Detached: the supervisor owns no handle to it, since there is
/// nothing to join on a clean exit (the process ends the sweep for us).
fn spawn_ignore_sweeper(supervisor: &Arc<Supervisor>) {
    let supervisor = Arc::clone(supervisor);
    std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_millis(500));
        supervisor.sweep_ignore_set();
    });
}
