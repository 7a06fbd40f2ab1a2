//! Collaboration Session Engine
//!
//! Coordinates short-lived deliberations among participants in response to
//! triggering events:
//!
//! - **Merge**: an incoming event similar enough to a live session is folded
//!   into it instead of opening a new one ([`similarity`]).
//! - **Selection**: participants come from the event, the category's default
//!   experts, and collaborators who succeeded on similar past events
//!   ([`ParticipantSelector`]).
//! - **Deliberation**: bounded discussion rounds, each producing one message
//!   per participant and one decision, until consensus or exhaustion
//!   ([`DecisionRoundSimulator`]).
//! - **Lifecycle**: periodic sweeps fail stalled sessions, archive old
//!   terminal ones into the semantic index, refresh metrics, and evict cache
//!   entries ([`Sweeper`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use council_engine::{EngineConfig, SessionOrchestrator};
//! use council_types::{Event, EventCategory};
//!
//! # async fn example() -> council_types::CouncilResult<()> {
//! let engine = SessionOrchestrator::in_memory(EngineConfig::default())?;
//! let session_id = engine
//!     .initiate(Event::new("evt-1", "Flash flood", EventCategory::Emergency))
//!     .await?;
//! engine.join_deliberation(&session_id).await?;
//! let view = engine.get_status(&session_id).await?;
//! println!("{} is {}", view.id, view.status);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod directory;
pub mod external;
pub mod narrator;
pub mod notify;
pub mod orchestrator;
pub mod registry;
pub mod selector;
pub mod semantic;
pub mod similarity;
pub mod simulator;
pub mod sweeper;
pub mod topics;

pub use cache::{CacheStats, DecisionCache, ResponseCache, TtlCache};
pub use config::{
    CacheConfig, DeliberationConfig, EngineConfig, MergeConfig, RetryPolicy, SelectionConfig,
    SweeperConfig,
};
pub use directory::{ExpertRole, ParticipantDirectory, ParticipantProfile};
pub use external::{
    IndexMatch, Metadata, MetadataFilter, NarrativeGenerator, ParticipantContext, SemanticIndex,
};
pub use narrator::{NarrativeClient, TemplateNarrator};
pub use notify::{
    spawn_subscriber, AnalyticsSink, Notification, NotificationBus, NotificationEnvelope,
    TracingAnalyticsSink,
};
pub use orchestrator::SessionOrchestrator;
pub use registry::{SessionHandle, SessionRegistry};
pub use selector::ParticipantSelector;
pub use semantic::InMemorySemanticIndex;
pub use simulator::{DecisionRoundSimulator, RoundOutcome};
pub use sweeper::{Sweeper, SweeperHandle};
