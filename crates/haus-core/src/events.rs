//! Typed progress events
//!
//! Events are serialized at the channel boundary; consumers deserialize into
//! the same types. The wire format is camelCase JSON with an ISO8601
//! timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Step,
    Log,
    Complete,
    Error,
}

/// Pipeline step names as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStep {
    Creating,
    Starting,
    Deploying,
    Syncing,
    Finalizing,
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Starting => "starting",
            Self::Deploying => "deploying",
            Self::Syncing => "syncing",
            Self::Finalizing => "finalizing",
        };
        write!(f, "{}", s)
    }
}

/// A progress event published as the pipeline advances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub container_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<PipelineStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn step(
        container_id: impl Into<String>,
        step: PipelineStep,
        percent: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            kind: EventKind::Step,
            step: Some(step),
            percent: Some(percent),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn log(container_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            kind: EventKind::Log,
            step: None,
            percent: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn complete(container_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            kind: EventKind::Complete,
            step: None,
            percent: Some(100),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(container_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            kind: EventKind::Error,
            step: None,
            percent: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Channel name for a container's progress stream
pub fn progress_channel(container_id: &str) -> String {
    format!("progress:{}", container_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_is_deterministic() {
        assert_eq!(progress_channel("c-1"), "progress:c-1");
    }

    #[test]
    fn test_step_event_wire_format() {
        let event = ProgressEvent::step("c-1", PipelineStep::Creating, 5, "Creating container");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"step\""));
        assert!(json.contains("\"step\":\"creating\""));
        assert!(json.contains("\"percent\":5"));
        assert!(json.contains("\"containerId\":\"c-1\""));
    }

    #[test]
    fn test_log_event_omits_step_and_percent() {
        let event = ProgressEvent::log("c-1", "line");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"step\""));
        assert!(!json.contains("\"percent\""));
    }

    #[test]
    fn test_complete_carries_percent_100() {
        let event = ProgressEvent::complete("c-1", "done");
        assert_eq!(event.percent, Some(100));
    }

    #[test]
    fn test_round_trip() {
        let event = ProgressEvent::step("c-9", PipelineStep::Syncing, 75, "running scripts");
        let json = serde_json::to_string(&event).unwrap();
        let back: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
