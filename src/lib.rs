//! Asynchronous speech-recognition job service.
//!
//! Clients submit base64-encoded audio over HTTP (`asr-api`); a cron-driven
//! scheduler (`asr-sched`) supervises external whisper engine processes,
//! persisting job lifecycle state in Postgres and artifacts in a
//! date-partitioned directory layout.

pub mod api;
pub mod budget;
pub mod config;
pub mod job;
pub mod layout;
pub mod scheduler;
pub mod seed;
pub mod store;
pub mod supervisor;

use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for a binary. Logs go to stderr with compact
/// `YYMMDD:HHMMSS` timestamps; `RUST_LOG` overrides the verbosity flags.
pub fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(ChronoLocal::new("%y%m%d:%H%M%S".to_string()))
        .init();
}
