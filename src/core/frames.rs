//! Wire frames exchanged with the store positioning service
//!
//! Outbound frames are tiny commands tagged by `msg_type`, inbound frames are
//! tagged by `type`. Only direction updates are understood; anything else
//! decodes to [`InboundFrame::Unknown`] and is dropped by the caller.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::heading::heading_degrees;

/// Role announced in every outbound frame unless configured otherwise
pub const DEFAULT_ROLE: &str = "client";

/// Command frames sent from the client to the positioning service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Handshake, sent once right after the transport opens
    Init,
    /// Ask the service for the direction to the nearest product
    FetchClosestProduct,
}

impl OutboundFrame {
    /// Wire value of the `msg_type` field
    pub fn msg_type(self) -> &'static str {
        match self {
            OutboundFrame::Init => "init",
            OutboundFrame::FetchClosestProduct => "fetch_closest_product",
        }
    }

    /// Serialize into the JSON text frame put on the socket
    pub fn encode(self, role: &str) -> String {
        json!({ "role": role, "msg_type": self.msg_type() }).to_string()
    }
}

/// Last known direction towards the nearest product
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectionFrame {
    pub dx: f64,
    pub dy: f64,
    /// Identifier of the product the vector points at, when the service knows it
    #[serde(rename = "closestProductId", default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

impl DirectionFrame {
    pub fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy, target_id: None }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// Compass bearing of this vector, see [`heading_degrees`]
    pub fn heading(&self) -> f64 {
        heading_degrees(self.dx, self.dy)
    }
}

/// Decoded inbound frame
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    Direction(DirectionFrame),
    /// Malformed JSON, unrecognized `type`, or a direction frame with bad fields
    Unknown,
}

impl InboundFrame {
    /// Decode a raw text frame. Never fails: anything not understood is `Unknown`.
    pub fn decode(raw: &str) -> Self {
        super::parser::parse_frame(raw).map_or(InboundFrame::Unknown, InboundFrame::Direction)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, InboundFrame::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_encode_init() {
        let v: Value = serde_json::from_str(&OutboundFrame::Init.encode(DEFAULT_ROLE)).unwrap();
        assert_eq!(v["role"], "client");
        assert_eq!(v["msg_type"], "init");
        assert_eq!(v.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_encode_fetch_closest_with_custom_role() {
        let text = OutboundFrame::FetchClosestProduct.encode("kiosk");
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["role"], "kiosk");
        assert_eq!(v["msg_type"], "fetch_closest_product");
    }

    #[test]
    fn test_direction_frame_serializes_wire_name() {
        let frame = DirectionFrame::new(1.0, -2.0).with_target("milk-1l");
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["closestProductId"], "milk-1l");
        assert!(v.get("target_id").is_none());
    }

    #[test]
    fn test_decode_maps_garbage_to_unknown() {
        assert!(InboundFrame::decode("not json").is_unknown());
        assert!(InboundFrame::decode(r#"{"type":"stats"}"#).is_unknown());
    }
}
