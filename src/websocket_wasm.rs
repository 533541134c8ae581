//! WASM guidance client for connecting to the store positioning service
//!
//! Browser sockets and `setTimeout` drive the same [`GuidanceMachine`] as the
//! native client. Everything lives on the JS event loop, so state is shared
//! through `Rc<RefCell<..>>` and callbacks only hold `Weak` references.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{CloseEvent, Event, MessageEvent, WebSocket};

use crate::config::GuidanceConfig;
use crate::core::{DirectionFrame, Effect, GuidanceMachine, GuidanceView, TransportId};
use crate::error::GuidanceError;
use crate::time::now_seconds;
use crate::ws_state::ConnectionStatus;

/// Pending `setTimeout`, cleared on drop
struct Timeout {
    handle: i32,
}

impl Timeout {
    /// Run `step` on the machine after `delay`, unless cleared first
    fn schedule(
        inner: &Rc<RefCell<Inner>>,
        delay: Duration,
        step: impl FnOnce(&mut GuidanceMachine) -> Vec<Effect> + 'static,
    ) -> Option<Self> {
        let weak = Rc::downgrade(inner);
        // Frees itself after firing; a cleared timer leaks this one closure
        let callback = Closure::once_into_js(move || {
            if let Some(inner) = weak.upgrade() {
                dispatch(&inner, step);
            }
        });
        let window = web_sys::window()?;
        let millis = delay.as_millis().min(i32::MAX as u128) as i32;
        match window
            .set_timeout_with_callback_and_timeout_and_arguments_0(callback.unchecked_ref(), millis)
        {
            Ok(handle) => Some(Self { handle }),
            Err(e) => {
                error!(?e, "Failed to schedule timer");
                None
            }
        }
    }
}

impl Drop for Timeout {
    fn drop(&mut self) {
        if let Some(window) = web_sys::window() {
            window.clear_timeout_with_handle(self.handle);
        }
    }
}

/// Browser socket plus the callbacks registered on it
struct Socket {
    id: TransportId,
    ws: WebSocket,
    _on_open: Closure<dyn FnMut(JsValue)>,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_error: Closure<dyn FnMut(Event)>,
    _on_close: Closure<dyn FnMut(CloseEvent)>,
}

impl Socket {
    fn open(inner: &Rc<RefCell<Inner>>, id: TransportId, url: &str) -> Result<Self, JsValue> {
        info!(url, transport = id, "Connecting to WebSocket");
        let ws = WebSocket::new(url)?;
        let weak = Rc::downgrade(inner);

        // On open - the machine sends init and flushes the queue
        let on_open = callback(&weak, move |inner, _: JsValue| {
            info!(transport = id, "WebSocket connected");
            dispatch(inner, |m| m.on_open(id));
        });
        ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));

        let on_message = callback(&weak, move |inner, e: MessageEvent| {
            if let Ok(txt) = e.data().dyn_into::<js_sys::JsString>() {
                let msg: String = txt.into();
                dispatch(inner, |m| m.on_frame(id, &msg, now_seconds()));
            }
        });
        ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

        // Browsers give no detail on socket errors; the close event follows
        let on_error = callback(&weak, move |inner, e: Event| {
            error!(transport = id, event = %e.type_(), "WebSocket error");
            dispatch(inner, |m| m.on_transport_error(id, "Connection error"));
        });
        ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        let on_close = callback(&weak, move |inner, e: CloseEvent| {
            warn!(transport = id, code = e.code(), reason = %e.reason(), "WebSocket closed");
            dispatch(inner, |m| m.on_transport_close(id));
        });
        ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));

        Ok(Self {
            id,
            ws,
            _on_open: on_open,
            _on_message: on_message,
            _on_error: on_error,
            _on_close: on_close,
        })
    }

    fn detach(&self) {
        self.ws.set_onopen(None);
        self.ws.set_onmessage(None);
        self.ws.set_onerror(None);
        self.ws.set_onclose(None);
    }

    fn close(self) {
        self.detach();
        if let Err(e) = self.ws.close() {
            debug!(transport = self.id, ?e, "Failed to close WebSocket");
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        // JS must not call into closures that are about to be freed
        self.detach();
    }
}

/// Wrap a socket callback so it is a no-op once the client is gone
fn callback<E: 'static>(
    weak: &Weak<RefCell<Inner>>,
    f: impl Fn(&Rc<RefCell<Inner>>, E) + 'static,
) -> Closure<dyn FnMut(E)>
where
    dyn FnMut(E): wasm_bindgen::closure::WasmClosure,
{
    let weak = weak.clone();
    Closure::wrap(Box::new(move |e: E| {
        if let Some(inner) = weak.upgrade() {
            f(&inner, e);
        }
    }) as Box<dyn FnMut(E)>)
}

struct Inner {
    machine: GuidanceMachine,
    /// Only replaced by Open/Close effects, never from inside its own callbacks
    socket: Option<Socket>,
    liveness: Option<Timeout>,
    reconnect: Option<Timeout>,
}

/// Run one machine step, then carry out its effects
fn dispatch(inner: &Rc<RefCell<Inner>>, step: impl FnOnce(&mut GuidanceMachine) -> Vec<Effect>) {
    let effects = step(&mut inner.borrow_mut().machine);
    apply(inner, effects);
}

fn apply(inner: &Rc<RefCell<Inner>>, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::Open { id, url } => match Socket::open(inner, id, &url) {
                Ok(socket) => inner.borrow_mut().socket = Some(socket),
                Err(e) => {
                    error!(transport = id, ?e, "Failed to create WebSocket");
                    dispatch(inner, |m| {
                        let mut effects = m.on_transport_error(id, "Failed to connect");
                        effects.extend(m.on_transport_close(id));
                        effects
                    });
                }
            },
            Effect::Send(text) => {
                let guard = inner.borrow();
                match &guard.socket {
                    Some(socket) => {
                        debug!(transport = socket.id, frame = %text, "Sending frame");
                        if let Err(e) = socket.ws.send_with_str(&text) {
                            error!(?e, "Failed to send frame");
                        }
                    }
                    None => warn!("No socket to send on, frame dropped"),
                }
            }
            Effect::Close => {
                let socket = inner.borrow_mut().socket.take();
                if let Some(socket) = socket {
                    socket.close();
                }
            }
            Effect::ArmLiveness { generation, after } => {
                let timer = Timeout::schedule(inner, after, move |m| m.on_liveness_elapsed(generation));
                inner.borrow_mut().liveness = timer;
            }
            Effect::DisarmLiveness => {
                let timer = inner.borrow_mut().liveness.take();
                drop(timer);
            }
            Effect::ScheduleReconnect { after } => {
                let timer = Timeout::schedule(inner, after, GuidanceMachine::on_reconnect_elapsed);
                inner.borrow_mut().reconnect = timer;
            }
            Effect::CancelReconnect => {
                let timer = inner.borrow_mut().reconnect.take();
                drop(timer);
            }
        }
    }
}

/// WASM guidance client
pub struct WasmGuidanceClient {
    inner: Rc<RefCell<Inner>>,
}

impl WasmGuidanceClient {
    /// Validate `config` and start connecting
    pub fn connect(config: GuidanceConfig) -> Result<Self, GuidanceError> {
        config.validate()?;
        let inner = Rc::new(RefCell::new(Inner {
            machine: GuidanceMachine::new(config),
            socket: None,
            liveness: None,
            reconnect: None,
        }));
        dispatch(&inner, GuidanceMachine::connect);
        Ok(Self { inner })
    }

    /// Ask the positioning service for the nearest product
    pub fn send_fetch_closest(&self) -> Result<(), GuidanceError> {
        if self.inner.borrow().machine.is_disposed() {
            return Err(GuidanceError::Disposed);
        }
        dispatch(&self.inner, GuidanceMachine::send_fetch_closest);
        Ok(())
    }

    pub fn dispose(&self) {
        dispatch(&self.inner, GuidanceMachine::dispose);
    }

    pub fn view(&self) -> GuidanceView {
        self.inner.borrow().machine.view().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.borrow().machine.status()
    }

    pub fn last_direction(&self) -> Option<DirectionFrame> {
        self.inner.borrow().machine.last_direction().cloned()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.borrow().machine.last_error().map(str::to_string)
    }

    pub fn heading(&self) -> Option<f64> {
        self.inner.borrow().machine.view().heading()
    }
}

impl Drop for WasmGuidanceClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ============================================================================
// JS bindings
// ============================================================================

/// Guidance handle exposed to the shopping-mode UI
#[wasm_bindgen]
pub struct DirectionGuidance {
    client: WasmGuidanceClient,
}

#[wasm_bindgen]
impl DirectionGuidance {
    #[wasm_bindgen(constructor)]
    pub fn new(url: &str) -> Result<DirectionGuidance, JsValue> {
        WasmGuidanceClient::connect(GuidanceConfig::new(url))
            .map(|client| Self { client })
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// One of `connecting`, `connected`, `disconnected`, `simulator_unavailable`
    pub fn status(&self) -> String {
        self.client.status().label().to_string()
    }

    /// Last direction frame as JSON (`{dx, dy, closestProductId?}`)
    #[wasm_bindgen(js_name = lastDirection)]
    pub fn last_direction(&self) -> Option<String> {
        let frame = self.client.last_direction()?;
        serde_json::to_string(&frame).ok()
    }

    /// Bearing in degrees, 0 = east, counter-clockwise
    pub fn heading(&self) -> Option<f64> {
        self.client.heading()
    }

    #[wasm_bindgen(js_name = lastError)]
    pub fn last_error(&self) -> Option<String> {
        self.client.last_error()
    }

    #[wasm_bindgen(js_name = sendFetchClosest)]
    pub fn send_fetch_closest(&self) -> Result<(), JsValue> {
        self.client
            .send_fetch_closest()
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    pub fn dispose(&self) {
        self.client.dispose();
    }
}
