//! SSE event envelope and text framing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::diff::{FileContentDiff, FileTreeDiff};
use crate::snapshot::FileTreeNode;

/// Comment frame sent on idle streams so proxies keep the connection open
pub const KEEP_ALIVE_FRAME: &str = ": ping\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Full tree sent when a subscription starts
    Initial,
    FileTreeDiff,
    FileContentDiff,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Initial => "initial",
            EventType::FileTreeDiff => "file_tree_diff",
            EventType::FileContentDiff => "file_content_diff",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    TreeDiff(FileTreeDiff),
    ContentDiff(FileContentDiff),
    Tree(FileTreeNode),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::TreeDiff(_) => EventType::FileTreeDiff,
            EventPayload::ContentDiff(_) => EventType::FileContentDiff,
            EventPayload::Tree(_) => EventType::Initial,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub event_id: Uuid,
    pub data: EventPayload,
}

impl SseEvent {
    /// Wrap a payload with a fresh, time-ordered id and the current time
    pub fn new(data: EventPayload) -> Self {
        Self {
            event_type: data.event_type(),
            timestamp: Utc::now(),
            event_id: Uuid::now_v7(),
            data,
        }
    }

    /// `event: <type>\ndata: <json>\n\n`
    pub fn to_frame(&self) -> serde_json::Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("event: {}\ndata: {}\n\n", self.event_type, json))
    }
}

/// Split one frame back into its event name and JSON body.
///
/// Comment frames and frames without a `data:` line yield `None`.
pub fn parse_frame(frame: &str) -> Option<(String, serde_json::Value)> {
    let mut event = None;
    let mut data = None;

    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data = serde_json::from_str(rest.trim()).ok();
        }
    }

    Some((event?, data?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffType;

    #[test]
    fn test_frame_layout() {
        let event = SseEvent::new(EventPayload::TreeDiff(FileTreeDiff {
            removed: vec!["a.txt".to_string()],
            ..Default::default()
        }));
        let frame = event.to_frame().unwrap();

        assert!(frame.starts_with("event: file_tree_diff\ndata: {"));
        assert!(frame.ends_with("}\n\n"));
        assert_eq!(frame.lines().count(), 2);
    }

    #[test]
    fn test_frame_body_fields() {
        let event = SseEvent::new(EventPayload::ContentDiff(FileContentDiff {
            path: "a.txt".to_string(),
            hash: "h".to_string(),
            diff_type: DiffType::Full,
            content: "line one\nline two".to_string(),
        }));
        let (name, body) = parse_frame(&event.to_frame().unwrap()).unwrap();

        assert_eq!(name, "file_content_diff");
        assert_eq!(body["type"], "file_content_diff");
        assert_eq!(body["eventId"], event.event_id.to_string());
        assert_eq!(body["data"]["content"], "line one\nline two");
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn test_keep_alive_is_not_an_event() {
        assert!(parse_frame(KEEP_ALIVE_FRAME).is_none());
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = SseEvent::new(EventPayload::TreeDiff(FileTreeDiff::default()));
        let b = SseEvent::new(EventPayload::TreeDiff(FileTreeDiff::default()));
        assert_ne!(a.event_id, b.event_id);
    }
}
