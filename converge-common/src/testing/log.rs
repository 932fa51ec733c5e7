//! Test logging for suites that wait on live systems.
//!
//! Call [`init_test_logging`] at the top of any test; it is safe to call
//! from every test and installs the subscriber only once.
//!
//! ```ignore
//! #[tokio::test]
//! async fn test_operator_settles() {
//!     converge_common::testing::init_test_logging();
//!     // poll output now shows up in the captured test output
//! }
//! ```

use std::path::PathBuf;
use std::sync::{Mutex, Once};

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

static TEST_LOGGING_INIT: Once = Once::new();

/// Install a global subscriber writing compact lines to the test writer.
///
/// # Environment Variables
///
/// - `CONVERGE_TEST_LOG_LEVEL`: filter for the converge crates (default: `debug`)
/// - `CONVERGE_TEST_LOG_FILE`: also mirror every event as JSON lines to this file
pub fn init_test_logging() {
    TEST_LOGGING_INIT.call_once(|| {
        let file_layer = open_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let test_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let level = std::env::var("CONVERGE_TEST_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "converge={level},converge_common={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(test_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn open_log_file() -> Option<std::fs::File> {
    let path = PathBuf::from(std::env::var("CONVERGE_TEST_LOG_FILE").ok()?);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .ok()
}
