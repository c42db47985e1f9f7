pub mod types;
pub mod error;
pub mod config;
pub mod swiss;
pub mod bracket;
pub mod progression;
pub mod status;
pub mod store;
pub mod cache;
pub mod notify;
pub mod service;
pub mod simulate;

pub use bracket::{EventBracket, Match, PlayoffRound, SlotSource};
pub use config::{load_config, EngineConfig};
pub use error::{BracketError, ConfigError};
pub use notify::{BracketEvent, BracketNotifier, BroadcastNotifier};
pub use progression::{BracketProgression, ResultInput};
pub use service::BracketService;
pub use simulate::{SimulationReport, Simulator};
pub use status::{BracketStatus, BracketView};
pub use types::*;

use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Daily-rolling file logging into `config.log_dir`. `RUST_LOG` wins over the
/// configured filter. Keep the returned guard alive for the life of the process.
pub fn init_tracing(config: &EngineConfig) -> WorkerGuard {
    fs::create_dir_all(&config.log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "bracket-engine.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    guard
}
