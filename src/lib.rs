//! Ingredient compass - real-time "find my ingredient" guidance client
//!
//! Keeps a WebSocket link to the in-store positioning service and provides:
//! - connection status, including "simulator not answering"
//! - the last direction vector towards the nearest product, as a compass bearing
//! - a locate command that is queued while the link is down
//!
//! The state machine in [`core`] is shared by the native (tokio) client and
//! the browser (web-sys) client.

pub mod config;
pub mod core;
pub mod error;
pub mod time;
pub mod ws_state;

#[cfg(all(not(target_arch = "wasm32"), feature = "cli"))]
pub mod websocket_native;

#[cfg(all(target_arch = "wasm32", feature = "wasm"))]
pub mod websocket_wasm;

pub use config::{GuidanceConfig, DEFAULT_WS_URL};
pub use crate::core::{heading_degrees, CompassPoint, DirectionFrame, GuidanceMachine, GuidanceView};
pub use error::{ConfigError, GuidanceError};
pub use ws_state::ConnectionStatus;

#[cfg(all(not(target_arch = "wasm32"), feature = "cli"))]
pub use websocket_native::NativeGuidanceClient;

#[cfg(all(target_arch = "wasm32", feature = "wasm"))]
pub use websocket_wasm::{DirectionGuidance, WasmGuidanceClient};

#[cfg(all(target_arch = "wasm32", feature = "wasm"))]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();

    // Initialize tracing for browser console
    tracing_wasm::set_as_global_default();
}
