//! Run event protocol and delivery.
//!
//! Events are ordered per run and delivered at-most-once to a single live
//! subscriber. There is no durable replay log: a reconnecting client calls
//! the snapshot endpoint instead of replaying missed events.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::pipeline::{NodeKey, PipelineStatus};

// ── Event types ──────────────────────────────────────────────────────

/// Events emitted during a run, named as they appear on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload", rename_all = "snake_case")]
pub enum RunEvent {
    /// First event on every new stream connection.
    Connected { run_id: String },
    StageStart {
        node: NodeKey,
        version: i64,
    },
    StageComplete {
        node: NodeKey,
        /// Finer-grained position, e.g. a section name.
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    StageFailed {
        node: NodeKey,
        error: String,
    },
    GateOpened {
        gate_id: String,
        node: NodeKey,
        payload: serde_json::Value,
    },
    ReadinessUpdate {
        node: NodeKey,
        score: f64,
        threshold: f64,
    },
    PipelineComplete {
        status: PipelineStatus,
    },
    ReplanRequested {
        replan_id: i64,
        rebuild_from: NodeKey,
        requires_restart: bool,
    },
    ReplanStarted {
        replan_id: i64,
    },
    ReplanCompleted {
        replan_id: i64,
    },
}

impl RunEvent {
    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::StageStart { .. } => "stage_start",
            Self::StageComplete { .. } => "stage_complete",
            Self::StageFailed { .. } => "stage_failed",
            Self::GateOpened { .. } => "gate_opened",
            Self::ReadinessUpdate { .. } => "readiness_update",
            Self::PipelineComplete { .. } => "pipeline_complete",
            Self::ReplanRequested { .. } => "replan_requested",
            Self::ReplanStarted { .. } => "replan_started",
            Self::ReplanCompleted { .. } => "replan_completed",
        }
    }
}

/// An event with its per-run sequence number and emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq: u64,
    pub emitted_at: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

// ── Delivery hub ─────────────────────────────────────────────────────

/// Per-run event delivery with at most one live subscriber.
///
/// A new subscription supersedes the previous one: the old sender is dropped,
/// which terminates the old stream. Events emitted while no subscriber is
/// connected are dropped — sequence numbers still advance, so a reconnecting
/// client can tell that it missed events and must resync via snapshot.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<EventEnvelope>>>,
    sequences: Mutex<HashMap<String, u64>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a run's events, superseding any prior subscriber.
    pub fn subscribe(&self, run_id: &str) -> mpsc::UnboundedReceiver<EventEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.subscribers.lock().expect("subscriber lock");
        // Dropping the previous sender closes the superseded stream.
        subs.insert(run_id.to_string(), tx);
        rx
    }

    /// Emit an event to the run's live subscriber, if any.
    pub fn emit(&self, run_id: &str, event: RunEvent) {
        let seq = {
            let mut seqs = self.sequences.lock().expect("sequence lock");
            let counter = seqs.entry(run_id.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let envelope = EventEnvelope {
            seq,
            emitted_at: Utc::now().to_rfc3339(),
            event,
        };

        let mut subs = self.subscribers.lock().expect("subscriber lock");
        let dead = match subs.get(run_id) {
            Some(tx) => tx.send(envelope).is_err(),
            None => false,
        };
        if dead {
            // Receiver gone; drop the dead subscriber.
            subs.remove(run_id);
        }
    }

    /// Sequence number of the last event emitted for a run.
    pub fn last_seq(&self, run_id: &str) -> u64 {
        self.sequences
            .lock()
            .expect("sequence lock")
            .get(run_id)
            .copied()
            .unwrap_or(0)
    }

    /// Drop a run's subscriber, if any.
    pub fn disconnect(&self, run_id: &str) {
        self.subscribers
            .lock()
            .expect("subscriber lock")
            .remove(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(
            RunEvent::Connected {
                run_id: "r1".into()
            }
            .name(),
            "connected"
        );
        assert_eq!(
            RunEvent::GateOpened {
                gate_id: "interview".into(),
                node: NodeKey::Interview,
                payload: serde_json::Value::Null,
            }
            .name(),
            "gate_opened"
        );
        assert_eq!(
            RunEvent::PipelineComplete {
                status: PipelineStatus::Complete
            }
            .name(),
            "pipeline_complete"
        );
    }

    #[test]
    fn test_event_serialization_uses_wire_names() {
        let event = RunEvent::StageComplete {
            node: NodeKey::Sections,
            detail: Some("summary".into()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"name\":\"stage_complete\""));
        assert!(json.contains("\"node\":\"sections\""));
        assert!(json.contains("\"detail\":\"summary\""));
    }

    #[test]
    fn test_envelope_flattens_event() {
        let envelope = EventEnvelope {
            seq: 7,
            emitted_at: "2025-01-01T00:00:00Z".into(),
            event: RunEvent::StageStart {
                node: NodeKey::Intake,
                version: 1,
            },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["name"], "stage_start");
        assert_eq!(json["payload"]["node"], "intake");
    }

    #[tokio::test]
    async fn test_emit_delivers_in_order() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe("r1");

        hub.emit(
            "r1",
            RunEvent::StageStart {
                node: NodeKey::Intake,
                version: 1,
            },
        );
        hub.emit(
            "r1",
            RunEvent::StageComplete {
                node: NodeKey::Intake,
                detail: None,
            },
        );

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(first.event.name(), "stage_start");
        assert_eq!(second.event.name(), "stage_complete");
    }

    #[tokio::test]
    async fn test_new_subscriber_supersedes_previous() {
        let hub = EventHub::new();
        let mut old_rx = hub.subscribe("r1");
        let mut new_rx = hub.subscribe("r1");

        hub.emit(
            "r1",
            RunEvent::Connected {
                run_id: "r1".into(),
            },
        );

        // The superseded stream terminates; the new one receives.
        assert!(old_rx.recv().await.is_none());
        assert!(new_rx.recv().await.is_some());
    }

    #[test]
    fn test_events_without_subscriber_advance_seq() {
        let hub = EventHub::new();
        hub.emit(
            "r1",
            RunEvent::StageStart {
                node: NodeKey::Intake,
                version: 1,
            },
        );
        hub.emit(
            "r1",
            RunEvent::StageComplete {
                node: NodeKey::Intake,
                detail: None,
            },
        );
        // No replay: a later subscriber sees only the gap in seq numbers.
        assert_eq!(hub.last_seq("r1"), 2);
    }

    #[test]
    fn test_runs_are_independent() {
        let hub = EventHub::new();
        hub.emit(
            "r1",
            RunEvent::Connected {
                run_id: "r1".into(),
            },
        );
        assert_eq!(hub.last_seq("r1"), 1);
        assert_eq!(hub.last_seq("r2"), 0);
    }
}
