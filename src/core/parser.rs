//! Parser for positioning-service WebSocket messages
//!
//! Only `{"type":"direction", ...}` frames carry data. Everything else is
//! dropped here so the state machine never sees it.

use super::DirectionFrame;
use serde_json::Value;
use tracing::{debug, trace, warn};

/// Parse a WebSocket message into a direction frame
///
/// Returns None for malformed JSON, non-direction messages, and direction
/// messages whose fields do not have the expected shape.
pub fn parse_frame(msg: &str) -> Option<DirectionFrame> {
    trace!(len = msg.len(), "Parsing message");

    let json: Value = serde_json::from_str(msg)
        .map_err(|e| {
            warn!(error = %e, "Failed to parse JSON");
        })
        .ok()?;

    let msg_type = json["type"].as_str()?;
    if msg_type != "direction" {
        debug!(msg_type, "Ignoring non-direction message");
        return None;
    }

    let frame: DirectionFrame = serde_json::from_value(json)
        .map_err(|e| {
            warn!(error = %e, "Malformed direction frame");
        })
        .ok()?;

    trace!(dx = frame.dx, dy = frame.dy, target = ?frame.target_id, "Direction frame");
    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_direction_frame() {
        let msg = r#"{
            "type": "direction",
            "dx": 3.5,
            "dy": -1,
            "closestProductId": "egg-12"
        }"#;

        let frame = parse_frame(msg).expect("direction frame");
        assert_eq!(frame.dx, 3.5);
        assert_eq!(frame.dy, -1.0);
        assert_eq!(frame.target_id.as_deref(), Some("egg-12"));
    }

    #[test]
    fn test_parse_direction_without_target() {
        let frame = parse_frame(r#"{"type":"direction","dx":0,"dy":1}"#).unwrap();
        assert_eq!(frame, DirectionFrame::new(0.0, 1.0));

        let frame = parse_frame(r#"{"type":"direction","dx":0,"dy":1,"closestProductId":null}"#).unwrap();
        assert!(frame.target_id.is_none());
    }

    #[test]
    fn test_ignore_other_types() {
        assert!(parse_frame(r#"{"type": "welcome", "dx": 1, "dy": 1}"#).is_none());
        assert!(parse_frame(r#"{"dx": 1, "dy": 1}"#).is_none());
        assert!(parse_frame(r#"{"type": 7}"#).is_none());
    }

    #[test]
    fn test_reject_malformed() {
        assert!(parse_frame("").is_none());
        assert!(parse_frame("{\"type\":\"direction\"").is_none());
        assert!(parse_frame(r#"{"type":"direction","dx":"left","dy":0}"#).is_none());
        assert!(parse_frame(r#"{"type":"direction","dy":0}"#).is_none());
        assert!(parse_frame(r#"[1, 2]"#).is_none());
    }
}
