//! Guidance connection state machine
//!
//! Owns everything about the link to the positioning service except the I/O:
//! status, last direction, outbound queue, reconnect backoff, and the
//! liveness timer for locate requests. Every input is a method call and every
//! side effect comes back as an [`Effect`] for the driver (tokio or browser)
//! to carry out. Drivers never decide anything themselves.
//!
//! Transports and liveness timers are tagged with ids so that events arriving
//! late (from a socket we already replaced, or a timer we already cancelled)
//! are recognized and ignored.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::{Backoff, DirectionFrame, InboundFrame, OutboundFrame};
use crate::config::GuidanceConfig;
use crate::ws_state::ConnectionStatus;

/// Identifies one transport (socket) opened by the machine
pub type TransportId = u64;

/// Side effect requested by the state machine
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Open a new socket; report its events tagged with `id`
    Open { id: TransportId, url: String },
    /// Write a text frame on the open socket
    Send(String),
    /// Close the current socket
    Close,
    /// (Re)arm the liveness timer, replacing any armed one
    ArmLiveness { generation: u64, after: Duration },
    DisarmLiveness,
    /// Call `on_reconnect_elapsed` after the delay
    ScheduleReconnect { after: Duration },
    CancelReconnect,
}

/// The last direction frame plus when it arrived
#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedDirection {
    pub frame: DirectionFrame,
    /// Seconds, on the driver's clock (see `time::now_seconds`)
    pub received_at: f64,
}

/// Snapshot of everything the UI reads
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuidanceView {
    pub status: ConnectionStatus,
    pub last_direction: Option<ReceivedDirection>,
    /// Most recent transport error, cleared on the next connect attempt
    pub last_error: Option<String>,
}

impl GuidanceView {
    pub fn direction(&self) -> Option<&DirectionFrame> {
        self.last_direction.as_ref().map(|d| &d.frame)
    }

    /// Bearing of the last direction frame in degrees
    pub fn heading(&self) -> Option<f64> {
        self.direction().map(DirectionFrame::heading)
    }

    /// Seconds since the last direction frame arrived
    pub fn direction_age(&self, now: f64) -> Option<f64> {
        self.last_direction
            .as_ref()
            .map(|d| (now - d.received_at).max(0.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transport {
    None,
    Opening(TransportId),
    Open(TransportId),
}

pub struct GuidanceMachine {
    config: GuidanceConfig,
    view: GuidanceView,
    /// Commands issued while the socket was not open, FIFO
    queue: VecDeque<OutboundFrame>,
    backoff: Backoff,
    transport: Transport,
    next_transport_id: TransportId,
    /// Generation of the armed liveness timer, if any
    liveness: Option<u64>,
    next_liveness_generation: u64,
    reconnect_pending: bool,
    disposed: bool,
}

impl GuidanceMachine {
    pub fn new(config: GuidanceConfig) -> Self {
        let backoff = Backoff::new(config.backoff_base, config.backoff_max);
        Self {
            config,
            view: GuidanceView::default(),
            queue: VecDeque::new(),
            backoff,
            transport: Transport::None,
            next_transport_id: 0,
            liveness: None,
            next_liveness_generation: 0,
            reconnect_pending: false,
            disposed: false,
        }
    }

    pub fn config(&self) -> &GuidanceConfig {
        &self.config
    }

    pub fn view(&self) -> &GuidanceView {
        &self.view
    }

    pub fn status(&self) -> ConnectionStatus {
        self.view.status
    }

    pub fn last_direction(&self) -> Option<&DirectionFrame> {
        self.view.direction()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.view.last_error.as_deref()
    }

    /// Number of commands waiting for the socket to open
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Delay the next reconnect will be scheduled with
    pub fn current_backoff(&self) -> Duration {
        self.backoff.current()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_transport_open(&self) -> bool {
        matches!(self.transport, Transport::Open(_))
    }

    /// Start connecting. No-op while a socket exists, a reconnect is
    /// already scheduled, or after dispose.
    pub fn connect(&mut self) -> Vec<Effect> {
        if self.disposed || self.reconnect_pending || self.transport != Transport::None {
            trace!(transport = ?self.transport, "connect() ignored");
            return Vec::new();
        }
        vec![self.open_transport()]
    }

    fn open_transport(&mut self) -> Effect {
        self.next_transport_id += 1;
        let id = self.next_transport_id;
        self.transport = Transport::Opening(id);
        self.view.status = ConnectionStatus::Connecting;
        self.view.last_error = None;
        info!(transport = id, url = %self.config.endpoint, "Connecting to positioning service");
        Effect::Open { id, url: self.config.endpoint.clone() }
    }

    /// Socket `id` finished its handshake
    pub fn on_open(&mut self, id: TransportId) -> Vec<Effect> {
        if self.disposed || self.transport != Transport::Opening(id) {
            debug!(transport = id, "Ignoring open from stale transport");
            return Vec::new();
        }
        self.transport = Transport::Open(id);
        info!(transport = id, queued = self.queue.len(), "Positioning service connected");

        let mut effects = vec![Effect::Send(OutboundFrame::Init.encode(&self.config.role))];
        self.view.status = ConnectionStatus::Connected;
        self.backoff.reset();

        while let Some(frame) = self.queue.pop_front() {
            debug!(msg_type = frame.msg_type(), "Flushing queued command");
            effects.extend(self.send_now(frame));
        }
        effects
    }

    /// Text frame received on socket `id`
    ///
    /// `now` is the driver's clock in seconds, stored with the direction.
    pub fn on_frame(&mut self, id: TransportId, raw: &str, now: f64) -> Vec<Effect> {
        if self.disposed || self.transport != Transport::Open(id) {
            trace!(transport = id, "Ignoring frame from stale transport");
            return Vec::new();
        }

        let frame = match InboundFrame::decode(raw) {
            InboundFrame::Direction(frame) => frame,
            InboundFrame::Unknown => return Vec::new(),
        };

        let mut effects = Vec::new();
        if self.liveness.take().is_some() {
            effects.push(Effect::DisarmLiveness);
        }
        if self.view.status == ConnectionStatus::SimulatorUnavailable {
            info!("Simulator answering again");
            self.view.status = ConnectionStatus::Connected;
        }
        debug!(dx = frame.dx, dy = frame.dy, target = ?frame.target_id, "Direction updated");
        self.view.last_direction = Some(ReceivedDirection { frame, received_at: now });
        effects
    }

    /// Socket `id` reported an error. Status is left to the close that follows.
    pub fn on_transport_error(&mut self, id: TransportId, message: &str) -> Vec<Effect> {
        if self.disposed || !self.is_current(id) {
            return Vec::new();
        }
        warn!(transport = id, error = %message, "Positioning socket error");
        self.view.last_error = Some(message.to_string());
        Vec::new()
    }

    /// Socket `id` closed (or never opened). Schedules the reconnect.
    pub fn on_transport_close(&mut self, id: TransportId) -> Vec<Effect> {
        if self.disposed || !self.is_current(id) {
            debug!(transport = id, "Ignoring close from stale transport");
            return Vec::new();
        }
        self.transport = Transport::None;
        self.view.status = ConnectionStatus::Disconnected;

        let mut effects = Vec::new();
        if self.liveness.take().is_some() {
            effects.push(Effect::DisarmLiveness);
        }

        let delay = self.backoff.next_delay();
        self.reconnect_pending = true;
        warn!(
            transport = id,
            delay_ms = delay.as_millis() as u64,
            "Positioning socket closed, reconnecting"
        );
        effects.push(Effect::ScheduleReconnect { after: delay });
        effects
    }

    /// Reconnect delay elapsed
    pub fn on_reconnect_elapsed(&mut self) -> Vec<Effect> {
        if self.disposed || !self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = false;
        vec![self.open_transport()]
    }

    /// Liveness timer `generation` fired without a direction frame in between
    pub fn on_liveness_elapsed(&mut self, generation: u64) -> Vec<Effect> {
        if self.disposed || self.liveness != Some(generation) {
            trace!(generation, "Ignoring stale liveness timer");
            return Vec::new();
        }
        self.liveness = None;
        if self.view.status == ConnectionStatus::Connected {
            warn!(
                timeout_ms = self.config.liveness_timeout.as_millis() as u64,
                "No direction from simulator, marking unavailable"
            );
            self.view.status = ConnectionStatus::SimulatorUnavailable;
        }
        Vec::new()
    }

    /// Ask for the direction to the nearest product
    ///
    /// Sent right away when the socket is open, otherwise queued. At most one
    /// locate request is ever queued; repeats while offline are dropped.
    pub fn send_fetch_closest(&mut self) -> Vec<Effect> {
        if self.disposed {
            return Vec::new();
        }
        let frame = OutboundFrame::FetchClosestProduct;
        if self.is_transport_open() {
            return self.send_now(frame);
        }
        if self.queue.contains(&frame) {
            debug!("Locate request already queued");
        } else {
            debug!(transport = ?self.transport, "Socket not open, queueing locate request");
            self.queue.push_back(frame);
        }
        Vec::new()
    }

    fn send_now(&mut self, frame: OutboundFrame) -> Vec<Effect> {
        let mut effects = vec![Effect::Send(frame.encode(&self.config.role))];
        if frame == OutboundFrame::FetchClosestProduct {
            self.next_liveness_generation += 1;
            let generation = self.next_liveness_generation;
            self.liveness = Some(generation);
            effects.push(Effect::ArmLiveness {
                generation,
                after: self.config.liveness_timeout,
            });
        }
        effects
    }

    /// Tear everything down. Idempotent; the machine ignores all input afterwards.
    pub fn dispose(&mut self) -> Vec<Effect> {
        if self.disposed {
            return Vec::new();
        }
        self.disposed = true;
        info!("Disposing guidance client");

        let mut effects = Vec::new();
        if self.liveness.take().is_some() {
            effects.push(Effect::DisarmLiveness);
        }
        if std::mem::take(&mut self.reconnect_pending) {
            effects.push(Effect::CancelReconnect);
        }
        if self.transport != Transport::None {
            self.transport = Transport::None;
            effects.push(Effect::Close);
        }
        self.queue.clear();
        effects
    }

    fn is_current(&self, id: TransportId) -> bool {
        matches!(self.transport, Transport::Opening(t) | Transport::Open(t) if t == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    const URL: &str = "ws://127.0.0.1:9/ws";

    fn machine() -> GuidanceMachine {
        GuidanceMachine::new(GuidanceConfig::new(URL))
    }

    fn msg_types(effects: &[Effect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(text) => {
                    let v: Value = serde_json::from_str(text).unwrap();
                    Some(v["msg_type"].as_str().unwrap().to_string())
                }
                _ => None,
            })
            .collect()
    }

    fn open_id(effects: &[Effect]) -> TransportId {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::Open { id, .. } => Some(*id),
                _ => None,
            })
            .expect("open effect")
    }

    fn armed_generation(effects: &[Effect]) -> u64 {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::ArmLiveness { generation, .. } => Some(*generation),
                _ => None,
            })
            .expect("arm effect")
    }

    /// Machine with an open socket, returning its transport id
    fn connected() -> (GuidanceMachine, TransportId) {
        let mut m = machine();
        let id = open_id(&m.connect());
        m.on_open(id);
        (m, id)
    }

    const DIRECTION: &str = r#"{"type":"direction","dx":0,"dy":1,"closestProductId":"p1"}"#;

    #[test]
    fn test_connect_opens_once() {
        let mut m = machine();
        assert_eq!(m.status(), ConnectionStatus::Connecting);
        let effects = m.connect();
        assert_eq!(effects, vec![Effect::Open { id: 1, url: URL.to_string() }]);
        assert!(m.connect().is_empty());
        m.on_open(1);
        assert!(m.connect().is_empty());
    }

    #[test]
    fn test_open_sends_init_and_resets_backoff() {
        let mut m = machine();
        let id = open_id(&m.connect());
        m.on_transport_close(id);
        let id = open_id(&m.on_reconnect_elapsed());
        m.on_transport_close(id);
        assert_eq!(m.current_backoff(), Duration::from_millis(4000));

        let id = open_id(&m.on_reconnect_elapsed());
        let effects = m.on_open(id);
        assert_eq!(msg_types(&effects), vec!["init"]);
        assert_eq!(m.status(), ConnectionStatus::Connected);
        assert_eq!(m.current_backoff(), Duration::from_millis(1000));

        let v: Value = match &effects[0] {
            Effect::Send(text) => serde_json::from_str(text).unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(v["role"], "client");
    }

    #[test]
    fn test_queued_locate_flushes_after_init() {
        let mut m = machine();
        assert!(m.send_fetch_closest().is_empty());
        let id = open_id(&m.connect());
        assert!(m.send_fetch_closest().is_empty());
        assert_eq!(m.queued(), 1);

        let effects = m.on_open(id);
        assert_eq!(msg_types(&effects), vec!["init", "fetch_closest_product"]);
        assert_eq!(m.queued(), 0);
        // Drained locate is in flight, so its liveness timer runs
        assert!(effects.iter().any(|e| matches!(e, Effect::ArmLiveness { .. })));

        let later = m.send_fetch_closest();
        assert_eq!(msg_types(&later), vec!["fetch_closest_product"]);
    }

    #[test]
    fn test_locate_sent_immediately_when_open() {
        let (mut m, _) = connected();
        let effects = m.send_fetch_closest();
        assert_eq!(msg_types(&effects), vec!["fetch_closest_product"]);
        assert_eq!(
            effects[1],
            Effect::ArmLiveness { generation: 1, after: Duration::from_millis(1500) }
        );
        assert_eq!(m.queued(), 0);
    }

    #[test]
    fn test_direction_updates_view() {
        let (mut m, id) = connected();
        assert!(m.last_direction().is_none());
        m.on_frame(id, DIRECTION, 4.0);
        let dir = m.last_direction().unwrap();
        assert_eq!(dir.target_id.as_deref(), Some("p1"));
        assert!((m.view().heading().unwrap() - 90.0).abs() < 1e-9);
        assert_eq!(m.view().direction_age(5.5), Some(1.5));

        // Overwritten in place
        m.on_frame(id, r#"{"type":"direction","dx":-2,"dy":0}"#, 6.0);
        assert_eq!(m.last_direction(), Some(&DirectionFrame::new(-2.0, 0.0)));
        assert!((m.view().heading().unwrap() - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_direction_disarms_liveness() {
        let (mut m, id) = connected();
        let generation = armed_generation(&m.send_fetch_closest());
        let effects = m.on_frame(id, DIRECTION, 0.0);
        assert_eq!(effects, vec![Effect::DisarmLiveness]);

        // The timer may still fire if cancellation raced; it must not count
        m.on_liveness_elapsed(generation);
        assert_eq!(m.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_liveness_timeout_marks_simulator_unavailable() {
        let (mut m, id) = connected();
        let generation = armed_generation(&m.send_fetch_closest());
        m.on_liveness_elapsed(generation);
        assert_eq!(m.status(), ConnectionStatus::SimulatorUnavailable);

        // Junk does not bring it back
        m.on_frame(id, r#"{"type":"noise"}"#, 0.0);
        assert_eq!(m.status(), ConnectionStatus::SimulatorUnavailable);

        m.on_frame(id, DIRECTION, 0.0);
        assert_eq!(m.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_new_locate_replaces_liveness_timer() {
        let (mut m, _) = connected();
        let first = armed_generation(&m.send_fetch_closest());
        let second = armed_generation(&m.send_fetch_closest());
        assert_ne!(first, second);

        m.on_liveness_elapsed(first);
        assert_eq!(m.status(), ConnectionStatus::Connected);
        m.on_liveness_elapsed(second);
        assert_eq!(m.status(), ConnectionStatus::SimulatorUnavailable);
    }

    #[test]
    fn test_simulator_unavailable_ends_on_close() {
        let (mut m, id) = connected();
        let generation = armed_generation(&m.send_fetch_closest());
        m.on_liveness_elapsed(generation);
        m.on_transport_close(id);
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_close_schedules_reconnect_with_doubling_backoff() {
        let mut m = machine();
        let mut delays = Vec::new();
        let mut id = open_id(&m.connect());
        for _ in 0..6 {
            let effects = m.on_transport_close(id);
            assert_eq!(m.status(), ConnectionStatus::Disconnected);
            let delay = effects
                .iter()
                .find_map(|e| match e {
                    Effect::ScheduleReconnect { after } => Some(after.as_millis() as u64),
                    _ => None,
                })
                .expect("reconnect scheduled");
            delays.push(delay);
            id = open_id(&m.on_reconnect_elapsed());
            assert_eq!(m.status(), ConnectionStatus::Connecting);
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[test]
    fn test_close_while_waiting_for_liveness_disarms_it() {
        let (mut m, id) = connected();
        m.send_fetch_closest();
        let effects = m.on_transport_close(id);
        assert_eq!(effects[0], Effect::DisarmLiveness);
        assert!(matches!(effects[1], Effect::ScheduleReconnect { .. }));
    }

    #[test]
    fn test_connect_during_pending_reconnect_is_noop() {
        let mut m = machine();
        let id = open_id(&m.connect());
        m.on_transport_close(id);
        assert!(m.connect().is_empty());
        assert_eq!(open_id(&m.on_reconnect_elapsed()), id + 1);
        assert!(m.on_reconnect_elapsed().is_empty());
    }

    #[test]
    fn test_stale_transport_events_ignored() {
        let mut m = machine();
        let old = open_id(&m.connect());
        m.on_transport_close(old);
        let new = open_id(&m.on_reconnect_elapsed());
        m.on_open(new);

        assert!(m.on_open(old).is_empty());
        assert!(m.on_frame(old, DIRECTION, 0.0).is_empty());
        assert!(m.last_direction().is_none());
        assert!(m.on_transport_close(old).is_empty());
        m.on_transport_error(old, "late");
        assert!(m.last_error().is_none());
        assert_eq!(m.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_frames_before_open_ignored() {
        let mut m = machine();
        let id = open_id(&m.connect());
        m.on_frame(id, DIRECTION, 0.0);
        assert!(m.last_direction().is_none());
    }

    #[test]
    fn test_repeated_locate_while_offline_coalesces() {
        let mut m = machine();
        for _ in 0..5 {
            m.send_fetch_closest();
        }
        assert_eq!(m.queued(), 1);
        let id = open_id(&m.connect());
        let effects = m.on_open(id);
        assert_eq!(msg_types(&effects), vec!["init", "fetch_closest_product"]);
    }

    #[test]
    fn test_queue_survives_failed_attempts() {
        let mut m = machine();
        let id = open_id(&m.connect());
        m.send_fetch_closest();
        m.on_transport_error(id, "refused");
        m.on_transport_close(id);
        let id = open_id(&m.on_reconnect_elapsed());
        assert_eq!(m.queued(), 1);
        let effects = m.on_open(id);
        assert_eq!(msg_types(&effects), vec!["init", "fetch_closest_product"]);
    }

    #[test]
    fn test_error_recorded_without_status_change() {
        let (mut m, id) = connected();
        assert!(m.on_transport_error(id, "Connection error").is_empty());
        assert_eq!(m.status(), ConnectionStatus::Connected);
        assert_eq!(m.last_error(), Some("Connection error"));

        m.on_transport_close(id);
        m.on_reconnect_elapsed();
        assert!(m.last_error().is_none());
    }

    #[test]
    fn test_malformed_frames_leave_state_unchanged() {
        let (mut m, id) = connected();
        m.on_frame(id, DIRECTION, 1.0);
        let before = m.view().clone();
        for raw in ["", "{", "null", r#"{"type":"direction","dx":"x","dy":1}"#, r#"{"type":"hello"}"#] {
            assert!(m.on_frame(id, raw, 9.0).is_empty());
            assert_eq!(m.view(), &before);
        }
    }

    #[test]
    fn test_dispose_cancels_everything() {
        let (mut m, id) = connected();
        m.send_fetch_closest();
        let effects = m.dispose();
        assert_eq!(effects, vec![Effect::DisarmLiveness, Effect::Close]);
        assert!(m.is_disposed());
        assert!(m.dispose().is_empty());

        let before = m.view().clone();
        assert!(m.on_frame(id, DIRECTION, 0.0).is_empty());
        assert!(m.on_transport_close(id).is_empty());
        assert!(m.on_liveness_elapsed(1).is_empty());
        assert!(m.on_reconnect_elapsed().is_empty());
        assert!(m.send_fetch_closest().is_empty());
        assert!(m.connect().is_empty());
        assert_eq!(m.view(), &before);
    }

    #[test]
    fn test_dispose_while_reconnect_pending() {
        let mut m = machine();
        let id = open_id(&m.connect());
        m.send_fetch_closest();
        m.on_transport_close(id);
        assert_eq!(m.dispose(), vec![Effect::CancelReconnect]);
        assert_eq!(m.queued(), 0);
        assert!(m.on_reconnect_elapsed().is_empty());
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_custom_role_in_frames() {
        let mut m = GuidanceMachine::new(GuidanceConfig::new(URL).with_role("cart-7"));
        let id = open_id(&m.connect());
        let effects = m.on_open(id);
        match &effects[0] {
            Effect::Send(text) => assert!(text.contains("\"cart-7\"")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
