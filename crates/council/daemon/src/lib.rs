//! Council daemon library
//!
//! Components behind `councild`:
//! - Layered configuration (defaults, file, environment)
//! - HTTP narrative backends (Ollama, OpenAI-compatible)
//! - Batch event ingestion from JSON lines

pub mod config;
pub mod error;
pub mod narrative;
pub mod runner;

pub use config::{DaemonConfig, LoggingConfig, NarrativeBackendConfig, NarrativeBackendKind};
pub use error::{DaemonError, DaemonResult};
pub use narrative::{build_narrator, HttpNarrator};
pub use runner::ingest_events;
