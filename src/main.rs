#[macro_use]
extern crate lazy_static;

mod cipher;
mod config;
mod credential;
mod dispatcher;
mod error;
mod exchange;
mod key_exchange;
mod reader;
mod signing;

use config::{Config, ReaderConfig};
use dispatcher::{Pipeline, ReaderEvent};
use reader::LineReader;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    // Nothing gets scanned unless setup finished, digest included
    let pipeline = match Pipeline::setup(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, "setup failed, not arming the card reader");
            return ExitCode::FAILURE;
        }
    };

    let on_event = |event: ReaderEvent| {
        let report = pipeline.handle_event(event);
        tracing::debug!(
            scanned_at = %report.scanned_at.to_rfc3339(),
            serial_number = ?report.serial_number,
            outcome = ?report.outcome,
            "scan handled"
        );
    };

    tracing::info!(server = %config.base_url(), "card reader armed");
    let result = match &config.reader {
        ReaderConfig::Stdin => {
            let stdin = std::io::stdin();
            LineReader::new(stdin.lock()).run(on_event)
        }
        ReaderConfig::Serial { path, baud_rate } => {
            reader::open_serial(path, *baud_rate).and_then(|reader| reader.run(on_event))
        }
    };

    let stats = pipeline.stats();
    tracing::info!(
        scans = stats.scans,
        accepted = stats.accepted,
        denied = stats.denied,
        busy = stats.busy,
        skipped = stats.skipped,
        ignored = stats.ignored,
        transport_failures = stats.transport_failures,
        "card reader stopped"
    );

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "card reader failed");
            ExitCode::FAILURE
        }
    }
}
