//! Engine configuration.
//!
//! Every field has a default so partial configuration files deserialize.

use council_types::{CouncilError, CouncilResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub deliberation: DeliberationConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Capacity of the notification broadcast channel
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,

    /// Interactions kept in memory; the oldest is dropped beyond this
    #[serde(default = "default_interaction_capacity")]
    pub interaction_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deliberation: DeliberationConfig::default(),
            merge: MergeConfig::default(),
            selection: SelectionConfig::default(),
            cache: CacheConfig::default(),
            sweeper: SweeperConfig::default(),
            notification_capacity: default_notification_capacity(),
            interaction_capacity: default_interaction_capacity(),
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot honor
    pub fn validate(&self) -> CouncilResult<()> {
        let d = &self.deliberation;
        if d.max_rounds == 0 {
            return Err(CouncilError::Validation(
                "deliberation.max_rounds must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("deliberation.min_consensus_threshold", d.min_consensus_threshold),
            ("deliberation.supporter_quota", d.supporter_quota),
            ("merge.similarity_threshold", self.merge.similarity_threshold),
            ("selection.suitability_threshold", self.selection.suitability_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CouncilError::Validation(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if d.response_delay_min_ms > d.response_delay_max_ms {
            return Err(CouncilError::Validation(format!(
                "response delay window is inverted: {} > {}",
                d.response_delay_min_ms, d.response_delay_max_ms
            )));
        }
        if self.selection.max_participants == 0 {
            return Err(CouncilError::Validation(
                "selection.max_participants must be at least 1".into(),
            ));
        }
        if self.notification_capacity == 0 {
            return Err(CouncilError::Validation(
                "notification_capacity must be at least 1".into(),
            ));
        }
        if self.interaction_capacity == 0 {
            return Err(CouncilError::Validation(
                "interaction_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Configuration with no artificial pacing, for tests and batch runs
    pub fn without_delays() -> Self {
        let mut config = Self::default();
        config.deliberation.response_delay_min_ms = 0;
        config.deliberation.response_delay_max_ms = 0;
        config.deliberation.retry.backoff_ms = 0;
        config
    }
}

/// Decision round configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationConfig {
    /// Upper bound on discussion rounds per session
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Support ratio at which a decision is accepted
    #[serde(default = "default_consensus_threshold")]
    pub min_consensus_threshold: f64,

    /// Fraction of participants counted as supporters of each proposal
    #[serde(default = "default_supporter_quota")]
    pub supporter_quota: f64,

    /// Lower bound of the simulated response delay
    #[serde(default = "default_delay_min")]
    pub response_delay_min_ms: u64,

    /// Upper bound of the simulated response delay
    #[serde(default = "default_delay_max")]
    pub response_delay_max_ms: u64,

    /// Timeout for each external call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default = "default_step")]
    pub progress_step: f64,

    #[serde(default = "default_step")]
    pub effectiveness_step: f64,

    /// Fixed seed for priority draws and delays
    #[serde(default)]
    pub rng_seed: Option<u64>,

    /// Run the round loop in the background as soon as a session enters
    /// `discussing`. When off, rounds only advance through polling.
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

impl Default for DeliberationConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            min_consensus_threshold: default_consensus_threshold(),
            supporter_quota: default_supporter_quota(),
            response_delay_min_ms: default_delay_min(),
            response_delay_max_ms: default_delay_max(),
            call_timeout_ms: default_call_timeout(),
            retry: RetryPolicy::default(),
            progress_step: default_step(),
            effectiveness_step: default_step(),
            rng_seed: None,
            autostart: default_autostart(),
        }
    }
}

impl DeliberationConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Retry policy for failed external calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_ms: 200,
            exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = if self.exponential_backoff {
            2u64.saturating_pow(attempt.saturating_sub(1))
        } else {
            1
        };
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Merge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Scores strictly above this merge the event into the session
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

/// Participant selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Hard cap on participants after optimization
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,

    /// Slots beyond the required set that optimization may fill
    #[serde(default = "default_extra_slots")]
    pub extra_slots: usize,

    /// Records fetched from the semantic index per lookup
    #[serde(default = "default_history_top_k")]
    pub history_top_k: usize,

    /// Minimum weighted trait score for a candidate without matching interests
    #[serde(default = "default_suitability_threshold")]
    pub suitability_threshold: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_participants: default_max_participants(),
            extra_slots: default_extra_slots(),
            history_top_k: default_history_top_k(),
            suitability_threshold: default_suitability_threshold(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_decision_ttl")]
    pub decision_ttl_secs: u64,

    #[serde(default = "default_response_ttl")]
    pub response_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            decision_ttl_secs: default_decision_ttl(),
            response_ttl_secs: default_response_ttl(),
        }
    }
}

/// Lifecycle sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_stall_interval")]
    pub stall_check_interval_secs: u64,

    /// Inactivity after which a non-terminal session fails with `timeout`
    #[serde(default = "default_decision_timeout")]
    pub decision_timeout_secs: u64,

    #[serde(default = "default_archival_interval")]
    pub archival_interval_secs: u64,

    /// Age of the last history entry before a terminal session is archived
    #[serde(default = "default_archive_after")]
    pub archive_after_secs: u64,

    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    #[serde(default = "default_eviction_interval")]
    pub cache_eviction_interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            stall_check_interval_secs: default_stall_interval(),
            decision_timeout_secs: default_decision_timeout(),
            archival_interval_secs: default_archival_interval(),
            archive_after_secs: default_archive_after(),
            metrics_interval_secs: default_metrics_interval(),
            cache_eviction_interval_secs: default_eviction_interval(),
        }
    }
}

// Default value helpers
fn default_notification_capacity() -> usize {
    1024
}

fn default_interaction_capacity() -> usize {
    10_000
}

fn default_max_rounds() -> u32 {
    2
}

fn default_consensus_threshold() -> f64 {
    0.7
}

fn default_supporter_quota() -> f64 {
    0.8
}

fn default_delay_min() -> u64 {
    500
}

fn default_delay_max() -> u64 {
    2000
}

fn default_call_timeout() -> u64 {
    10_000
}

fn default_step() -> f64 {
    0.1
}

fn default_autostart() -> bool {
    true
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_max_participants() -> usize {
    5
}

fn default_extra_slots() -> usize {
    2
}

fn default_history_top_k() -> usize {
    10
}

fn default_suitability_threshold() -> f64 {
    0.7
}

fn default_decision_ttl() -> u64 {
    5 * 60
}

fn default_response_ttl() -> u64 {
    30 * 60
}

fn default_stall_interval() -> u64 {
    3 * 60
}

fn default_decision_timeout() -> u64 {
    10 * 60
}

fn default_archival_interval() -> u64 {
    60 * 60
}

fn default_archive_after() -> u64 {
    24 * 60 * 60
}

fn default_metrics_interval() -> u64 {
    60
}

fn default_eviction_interval() -> u64 {
    5 * 60
}
