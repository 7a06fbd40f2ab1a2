//! Lifecycle Sweeper
//!
//! Periodic passes over the active sessions: stall detection, archival of
//! old terminal sessions, metrics refresh, and cache eviction. Each pass
//! locks one session at a time and never holds a lock across a semantic
//! index call. Every pass can also be invoked directly with an explicit
//! `now`.

use crate::cache::{DecisionCache, ResponseCache};
use crate::config::SweeperConfig;
use crate::external::{Metadata, SemanticIndex};
use crate::notify::{Notification, NotificationBus};
use crate::registry::SessionRegistry;
use chrono::{DateTime, Utc};
use council_types::{ExternalResult, SessionId, SessionStatus};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

/// Metadata `kind` of archived session summaries
pub const ARCHIVE_KIND: &str = "archived_session";

/// Background maintenance over the session registry
pub struct Sweeper {
    config: SweeperConfig,
    registry: Arc<SessionRegistry>,
    index: Arc<dyn SemanticIndex>,
    decision_cache: Arc<DecisionCache>,
    response_cache: Arc<ResponseCache>,
    bus: Arc<NotificationBus>,
}

/// Summary of a terminal session, captured before archival
struct ArchiveSnapshot {
    session_id: SessionId,
    status: SessionStatus,
    text: String,
    metadata: Metadata,
}

impl Sweeper {
    pub fn new(
        config: SweeperConfig,
        registry: Arc<SessionRegistry>,
        index: Arc<dyn SemanticIndex>,
        decision_cache: Arc<DecisionCache>,
        response_cache: Arc<ResponseCache>,
        bus: Arc<NotificationBus>,
    ) -> Self {
        Self {
            config,
            registry,
            index,
            decision_cache,
            response_cache,
            bus,
        }
    }

    /// Fail every non-terminal session idle for longer than the decision
    /// timeout. Returns the sessions failed by this pass.
    pub async fn detect_stalled(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let timeout = chrono::Duration::seconds(self.config.decision_timeout_secs as i64);
        let mut failed = Vec::new();

        for (session_id, handle) in self.registry.handles() {
            let mut session = handle.lock().await;
            if session.is_terminal() {
                continue;
            }
            let idle = now - session.last_activity();
            if idle <= timeout {
                continue;
            }

            let from = session.status;
            if session.fail(
                "timeout",
                json!({ "idle_secs": idle.num_seconds(), "status": from }),
            ) {
                tracing::warn!(
                    session_id = %session_id,
                    status = %from,
                    idle_secs = idle.num_seconds(),
                    "Session stalled, marking failed"
                );
                self.bus.publish(Notification::SessionFailed {
                    session_id: session_id.clone(),
                    reason: "timeout".into(),
                });
                failed.push(session_id);
            }
        }
        failed
    }

    /// Move terminal sessions idle past the archival age into the semantic
    /// index. A session leaves the registry only after its summary is stored.
    pub async fn archive_terminal(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let age = chrono::Duration::seconds(self.config.archive_after_secs as i64);
        let mut archived = Vec::new();

        for (session_id, handle) in self.registry.handles() {
            let snapshot = {
                let session = handle.lock().await;
                if !session.is_terminal() || now - session.last_activity() <= age {
                    continue;
                }
                let decisions: Vec<&str> = session
                    .decisions
                    .iter()
                    .map(|d| d.description.as_str())
                    .collect();
                let participants: Vec<&str> =
                    session.participants.iter().map(|p| p.as_str()).collect();

                let mut metadata = Metadata::new();
                metadata.insert("kind".into(), json!(ARCHIVE_KIND));
                metadata.insert("category".into(), json!(session.event.category.as_str()));
                metadata.insert("session_id".into(), json!(session.id));
                metadata.insert("event_id".into(), json!(session.event_id));
                metadata.insert("status".into(), json!(session.status));
                metadata.insert("participants".into(), json!(participants));
                metadata.insert("decisions".into(), json!(decisions));
                metadata.insert("archived_at".into(), json!(now));

                ArchiveSnapshot {
                    session_id: session.id.clone(),
                    status: session.status,
                    text: format!(
                        "session {} {} participants: {} decisions: {}",
                        session.id,
                        session.status,
                        participants.join(", "),
                        decisions.join("; ")
                    ),
                    metadata,
                }
            };

            let status = snapshot.status;
            match self.store_archive(snapshot).await {
                Ok(()) => {
                    self.registry.remove(&session_id);
                    tracing::info!(session_id = %session_id, "Session archived");
                    self.bus.publish(Notification::SessionArchived {
                        session_id: session_id.clone(),
                        status,
                    });
                    archived.push(session_id);
                }
                Err(err) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %err,
                        "Archival failed, will retry next pass"
                    );
                }
            }
        }
        archived
    }

    async fn store_archive(&self, snapshot: ArchiveSnapshot) -> ExternalResult<()> {
        let vector = self.index.embed(&snapshot.text).await?;
        self.index
            .upsert(
                &format!("archive:{}", snapshot.session_id),
                vector,
                snapshot.metadata,
            )
            .await
    }

    /// Recompute rolling metrics for every non-terminal session
    pub async fn refresh_metrics(&self) -> usize {
        let mut refreshed = 0;
        for (_, handle) in self.registry.handles() {
            let mut session = handle.lock().await;
            if session.is_terminal() {
                continue;
            }
            session.refresh_metrics();
            refreshed += 1;
        }
        tracing::debug!(refreshed, "Metrics refreshed");
        refreshed
    }

    /// Drop expired entries from both caches
    pub fn evict_caches(&self) -> usize {
        let decisions = self.decision_cache.evict_expired();
        let responses = self.response_cache.evict_expired();
        for (name, stats) in [
            (self.decision_cache.name(), self.decision_cache.stats()),
            (self.response_cache.name(), self.response_cache.stats()),
        ] {
            tracing::debug!(
                cache = name,
                hits = stats.hits,
                misses = stats.misses,
                hit_rate = stats.hit_rate(),
                expired_removed = stats.expired_removed,
                entries = stats.current_entries,
                "Cache stats"
            );
        }
        decisions + responses
    }

    /// Start one interval task per pass
    pub fn spawn(self: Arc<Self>) -> SweeperHandle {
        let (shutdown, receiver) = watch::channel(false);
        let config = &self.config;

        let tasks = vec![
            spawn_pass(
                "stall_detection",
                config.stall_check_interval_secs,
                receiver.clone(),
                {
                    let sweeper = self.clone();
                    move || {
                        let sweeper = sweeper.clone();
                        async move {
                            sweeper.detect_stalled(Utc::now()).await;
                        }
                    }
                },
            ),
            spawn_pass(
                "archival",
                config.archival_interval_secs,
                receiver.clone(),
                {
                    let sweeper = self.clone();
                    move || {
                        let sweeper = sweeper.clone();
                        async move {
                            sweeper.archive_terminal(Utc::now()).await;
                        }
                    }
                },
            ),
            spawn_pass(
                "metrics_refresh",
                config.metrics_interval_secs,
                receiver.clone(),
                {
                    let sweeper = self.clone();
                    move || {
                        let sweeper = sweeper.clone();
                        async move {
                            sweeper.refresh_metrics().await;
                        }
                    }
                },
            ),
            spawn_pass(
                "cache_eviction",
                config.cache_eviction_interval_secs,
                receiver,
                {
                    let sweeper = self.clone();
                    move || {
                        let sweeper = sweeper.clone();
                        async move {
                            sweeper.evict_caches();
                        }
                    }
                },
            ),
        ];

        tracing::info!("Lifecycle sweeper started");
        SweeperHandle { shutdown, tasks }
    }
}

fn spawn_pass<F, Fut>(
    name: &'static str,
    period_secs: u64,
    mut shutdown: watch::Receiver<bool>,
    pass: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let period = Duration::from_secs(period_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::trace!(pass = name, "Sweep pass");
                    pass().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(pass = name, "Sweep task stopped");
    })
}

/// Running sweeper tasks
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop every pass and wait for the tasks to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "Sweep task aborted");
            }
        }
        tracing::info!("Lifecycle sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::InMemorySemanticIndex;
    use council_types::{CollaborationSession, Event, EventCategory, ParticipantId};

    struct Fixture {
        sweeper: Sweeper,
        registry: Arc<SessionRegistry>,
        index: Arc<InMemorySemanticIndex>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SessionRegistry::new());
        let index = Arc::new(InMemorySemanticIndex::default());
        let sweeper = Sweeper::new(
            SweeperConfig::default(),
            registry.clone(),
            index.clone(),
            Arc::new(DecisionCache::new("decision", Duration::from_secs(300))),
            Arc::new(ResponseCache::new("response", Duration::from_secs(1800))),
            Arc::new(NotificationBus::new(16)),
        );
        Fixture {
            sweeper,
            registry,
            index,
        }
    }

    fn insert(registry: &SessionRegistry, status: SessionStatus) -> SessionId {
        let mut session = CollaborationSession::new(
            Event::new("e1", "Flood", EventCategory::Emergency),
            vec![ParticipantId::new("a")],
        );
        if status != SessionStatus::Planning {
            session.status = status;
        }
        let id = session.id.clone();
        registry.insert(session);
        id
    }

    #[tokio::test]
    async fn test_stalled_session_fails_once() {
        let f = fixture();
        let id = insert(&f.registry, SessionStatus::Discussing);
        let done = insert(&f.registry, SessionStatus::Completed);
        let later = Utc::now() + chrono::Duration::minutes(11);

        assert_eq!(f.sweeper.detect_stalled(later).await, vec![id.clone()]);
        assert_eq!(
            f.registry.view(&done).await.unwrap().status,
            SessionStatus::Completed
        );

        let view = f.registry.view(&id).await.unwrap();
        assert_eq!(view.status, SessionStatus::Failed);
        assert_eq!(view.failure_reason(), Some("timeout"));

        assert!(f.sweeper.detect_stalled(later).await.is_empty());
        let history = f.registry.view(&id).await.unwrap().history;
        assert_eq!(history.iter().filter(|h| h.action == "timeout").count(), 1);
    }

    #[tokio::test]
    async fn test_recent_activity_is_not_stalled() {
        let f = fixture();
        insert(&f.registry, SessionStatus::Discussing);
        assert!(f.sweeper.detect_stalled(Utc::now()).await.is_empty());
    }

    #[tokio::test]
    async fn test_archival_requires_terminal_and_age() {
        let f = fixture();
        let done = insert(&f.registry, SessionStatus::Completed);
        let active = insert(&f.registry, SessionStatus::Discussing);

        assert!(f.sweeper.archive_terminal(Utc::now()).await.is_empty());

        let later = Utc::now() + chrono::Duration::hours(25);
        assert_eq!(f.sweeper.archive_terminal(later).await, vec![done.clone()]);
        assert!(!f.registry.contains(&done));
        assert!(f.registry.contains(&active));

        let metadata = f.index.metadata(&format!("archive:{}", done)).unwrap();
        assert_eq!(metadata["kind"], ARCHIVE_KIND);
        assert_eq!(metadata["status"], "completed");
        assert_eq!(f.index.len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_refresh_skips_terminal_sessions() {
        let f = fixture();
        insert(&f.registry, SessionStatus::Discussing);
        insert(&f.registry, SessionStatus::Failed);
        assert_eq!(f.sweeper.refresh_metrics().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_passes_stop_on_shutdown() {
        let f = fixture();
        let handle = Arc::new(f.sweeper).spawn();
        tokio::time::advance(Duration::from_secs(61)).await;
        handle.shutdown().await;
    }
}
