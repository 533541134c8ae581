//! Platform-agnostic core module - shared between the WASM client and the CLI

pub mod backoff;
pub mod frames;
pub mod guidance;
pub mod heading;
pub mod parser;

pub use backoff::{Backoff, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX};
pub use frames::{DirectionFrame, InboundFrame, OutboundFrame, DEFAULT_ROLE};
pub use guidance::{Effect, GuidanceMachine, GuidanceView, ReceivedDirection, TransportId};
pub use heading::{heading_degrees, CompassPoint};
pub use parser::parse_frame;
