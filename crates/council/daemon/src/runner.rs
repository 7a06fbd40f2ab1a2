//! Batch ingestion of events from JSON lines.

use crate::error::{DaemonError, DaemonResult};
use council_engine::SessionOrchestrator;
use council_types::{Event, SessionId, SessionView};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Feed every event in `reader` through `initiate`, wait for the resulting
/// discussions, and return the final session views in first-seen order.
///
/// Blank lines and lines starting with `#` are skipped. Malformed JSON
/// stops ingestion; an event the engine rejects is logged and skipped.
pub async fn ingest_events<R>(
    engine: &SessionOrchestrator,
    reader: R,
) -> DaemonResult<Vec<SessionView>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut sessions: Vec<SessionId> = Vec::new();
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let event: Event = serde_json::from_str(trimmed).map_err(|e| DaemonError::Input {
            line: line_number,
            message: e.to_string(),
        })?;
        let event_id = event.id.clone();

        match engine.initiate(event).await {
            Ok(session_id) => {
                tracing::info!(event_id = %event_id, session_id = %session_id, "Event ingested");
                if !sessions.contains(&session_id) {
                    sessions.push(session_id);
                }
            }
            Err(err) => {
                tracing::warn!(line = line_number, event_id = %event_id, error = %err, "Event rejected");
            }
        }
    }

    let mut views = Vec::with_capacity(sessions.len());
    for session_id in &sessions {
        engine.join_deliberation(session_id).await?;
        views.push(engine.get_status(session_id).await?);
    }
    Ok(views)
}
