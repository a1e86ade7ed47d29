//! Typed payloads for the events the ingestion worker consumes.

use serde::{Deserialize, Serialize};

use crate::bus::DomainEvent;

/// Event type published when a new workflow version is added.
pub const WORKFLOW_VERSION_ADDED: &str = "workflow.version.added";

/// Payload of a [`WORKFLOW_VERSION_ADDED`] event.
///
/// Identifies the version to ingest; the source descriptor (git metadata
/// or local directory) lives on the persisted version itself, except for
/// `local_dir`, which points at an already-materialized file tree whose
/// lifecycle is owned by the publisher (e.g. a bulk import).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionAddedPayload {
    pub workspace_id: String,
    pub workflow_id: String,
    pub version_id: String,
    /// Pre-resolved local source directory, when the source is an upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_dir: Option<String>,
}

impl VersionAddedPayload {
    /// Wrap this payload in a [`DomainEvent`] envelope.
    pub fn to_event(&self) -> DomainEvent {
        DomainEvent::new(WORKFLOW_VERSION_ADDED)
            .with_source("workflow", self.workflow_id.clone())
            .with_payload(serde_json::to_value(self).unwrap_or_default())
    }

    /// Decode the payload from an event envelope.
    ///
    /// Returns `None` when the event is of a different type or its payload
    /// does not deserialize.
    pub fn from_event(event: &DomainEvent) -> Option<Self> {
        if event.event_type != WORKFLOW_VERSION_ADDED {
            return None;
        }
        serde_json::from_value(event.payload.clone()).ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_through_event_envelope() {
        let payload = VersionAddedPayload {
            workspace_id: "ws-1".into(),
            workflow_id: "wf-1".into(),
            version_id: "v-1".into(),
            local_dir: None,
        };

        let event = payload.to_event();
        assert_eq!(event.event_type, WORKFLOW_VERSION_ADDED);
        assert_eq!(event.source_entity_id.as_deref(), Some("wf-1"));

        let decoded = VersionAddedPayload::from_event(&event).expect("should decode");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn from_event_rejects_other_event_types() {
        let event = DomainEvent::new("workflow.created");
        assert!(VersionAddedPayload::from_event(&event).is_none());
    }
}
