use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use targetrpc_frame::{FrameLink, FrameSender, LinkConfig, PacketSink};
use targetrpc_transport::ByteStream;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RpcError};
use crate::handshake::HandshakeConfig;
use crate::log::LogSink;
use crate::packet::{Addressing, HeaderShape, PacketKind, RpcPacket, BROADCAST};

/// Callback for packets the channel does not consume itself.
pub type Handler = Arc<dyn Fn(&HandlerContext<'_>, &RpcPacket) + Send + Sync>;

/// Where a channel is in its link lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// No INIT seen yet, or the channel was closed.
    Disconnected,
    /// INIT seen; waiting for the rest of the exchange.
    Handshaking,
    Established,
    /// The device's INIT did not match our group/version.
    Rejected,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Handshaking => "handshaking",
            ChannelState::Established => "established",
            ChannelState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Label used in log output (usually the port).
    pub label: String,
    pub shape: HeaderShape,
    pub handshake: HandshakeConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            label: "rpc".to_string(),
            shape: HeaderShape::default(),
            handshake: HandshakeConfig::default(),
        }
    }
}

#[derive(Debug)]
struct Session {
    state: ChannelState,
    rejection: Option<String>,
    remote_group_id: u8,
    /// Opcode of the command awaiting a response.
    command: Option<u16>,
    response: Option<RpcPacket>,
    /// Opcode of the event awaiting an ACK, and the ACK once it arrives.
    pending_ack: Option<(u16, Option<RpcPacket>)>,
    events: VecDeque<RpcPacket>,
    closed: bool,
}

impl Session {
    fn new() -> Self {
        Self {
            state: ChannelState::Disconnected,
            rejection: None,
            remote_group_id: 0,
            command: None,
            response: None,
            pending_ack: None,
            events: VecDeque::new(),
            closed: false,
        }
    }

    /// Outcome of waiting for establishment, if there is one yet.
    fn established(&self) -> Option<Result<()>> {
        if self.closed {
            return Some(Err(RpcError::Closed));
        }
        match self.state {
            ChannelState::Established => Some(Ok(())),
            ChannelState::Rejected => Some(Err(RpcError::HandshakeRejected(
                self.rejection.clone().unwrap_or_default(),
            ))),
            ChannelState::Disconnected | ChannelState::Handshaking => None,
        }
    }
}

struct Shared {
    config: ChannelConfig,
    sink: Arc<dyn PacketSink>,
    session: Mutex<Session>,
    changed: Condvar,
    handlers: RwLock<HashMap<(PacketKind, u16), Handler>>,
    default_handler: RwLock<Option<Handler>>,
    log_sink: RwLock<Option<Arc<dyn LogSink>>>,
}

/// Lets a handler talk back to the device from the receive thread.
pub struct HandlerContext<'a> {
    shared: &'a Shared,
}

impl HandlerContext<'_> {
    /// Send a packet as-is.
    pub fn send(&self, packet: &RpcPacket) -> Result<()> {
        self.shared.send_packet(packet)
    }

    /// Send a packet addressed like the channel's own traffic.
    pub fn reply(&self, kind: PacketKind, opcode: u16, payload: impl Into<Bytes>) -> Result<()> {
        let packet = self.shared.outgoing(kind, opcode, payload.into());
        self.shared.send_packet(&packet)
    }

    pub fn state(&self) -> ChannelState {
        self.shared.lock().state
    }

    pub fn label(&self) -> &str {
        &self.shared.config.label
    }
}

/// RPC multiplexer for one device link.
///
/// Incoming packets are handled on the link's receive thread in arrival
/// order. Callers block in [`cmd`](Self::cmd), [`evt`](Self::evt) and
/// [`get_evt`](Self::get_evt) until the receive thread hands them a result
/// or their timeout expires. One command and one event may be outstanding
/// at a time.
pub struct RpcChannel {
    shared: Arc<Shared>,
    link: Mutex<Option<FrameLink>>,
}

impl RpcChannel {
    /// Start a framed link on `stream` and attach a channel to it.
    pub fn open(stream: ByteStream, link_config: LinkConfig, config: ChannelConfig) -> Result<Self> {
        let sender = FrameSender::new(
            stream.try_clone()?,
            link_config.checksum,
            link_config.write_timeout,
        );
        let channel = Self::with_sink(Arc::new(sender), config);

        let shared = Arc::clone(&channel.shared);
        let link = FrameLink::spawn(stream, link_config, move |payload| {
            shared.handle_payload(payload)
        })?;
        *channel.link_slot() = Some(link);

        info!(channel = %channel.label(), "rpc channel opened");
        Ok(channel)
    }

    /// A channel without a receive thread; feed it with [`handle_payload`](Self::handle_payload).
    pub fn with_sink(sink: Arc<dyn PacketSink>, config: ChannelConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                sink,
                session: Mutex::new(Session::new()),
                changed: Condvar::new(),
                handlers: RwLock::new(HashMap::new()),
                default_handler: RwLock::new(None),
                log_sink: RwLock::new(None),
            }),
            link: Mutex::new(None),
        }
    }

    /// Process one received frame payload.
    pub fn handle_payload(&self, payload: Bytes) {
        self.shared.handle_payload(payload);
    }

    pub fn label(&self) -> &str {
        &self.shared.config.label
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ChannelState {
        self.shared.lock().state
    }

    pub fn is_established(&self) -> bool {
        self.state() == ChannelState::Established
    }

    /// Group id the device announced in its INIT.
    pub fn remote_group_id(&self) -> u8 {
        self.shared.lock().remote_group_id
    }

    /// Block until the handshake completes.
    pub fn wait_established(&self, timeout: Duration) -> Result<()> {
        let deadline = deadline_after(timeout);
        self.shared
            .wait_for(deadline, |session| session.established())
            .unwrap_or(Err(RpcError::EstablishTimeout(timeout)))
    }

    /// Send a command and wait for its response.
    ///
    /// `timeout` covers both waiting for the link to be established and
    /// waiting for the response.
    pub fn cmd(&self, opcode: u16, payload: impl Into<Bytes>, timeout: Duration) -> Result<RpcPacket> {
        let deadline = deadline_after(timeout);
        let packet = self.shared.outgoing(PacketKind::Cmd, opcode, payload.into());
        let wire = packet.encode(self.shared.config.shape)?;

        {
            let mut session = self.shared.lock();
            if session.closed {
                return Err(RpcError::Closed);
            }
            if let Some(in_flight) = session.command {
                return Err(RpcError::CommandInFlight { opcode: in_flight });
            }
            session.command = Some(opcode);
            session.response = None;
        }

        let result = self.finish_command(opcode, &wire, timeout, deadline);

        let mut session = self.shared.lock();
        session.command = None;
        session.response = None;
        result
    }

    fn finish_command(
        &self,
        opcode: u16,
        wire: &[u8],
        timeout: Duration,
        deadline: Instant,
    ) -> Result<RpcPacket> {
        let timed_out = || RpcError::CommandTimeout { opcode, timeout };

        self.shared
            .wait_for(deadline, |session| session.established())
            .ok_or_else(timed_out)??;

        debug!(channel = %self.label(), opcode, "sending command");
        self.shared.sink.send(wire)?;

        self.shared
            .wait_for(deadline, |session| {
                if let Some(response) = session.response.take() {
                    return Some(Ok(response));
                }
                session.closed.then_some(Err(RpcError::Closed))
            })
            .ok_or_else(timed_out)?
    }

    /// Send an event and wait for the device's ACK, which is returned.
    pub fn evt(&self, opcode: u16, payload: impl Into<Bytes>, timeout: Duration) -> Result<RpcPacket> {
        let deadline = deadline_after(timeout);
        let packet = self.shared.outgoing(PacketKind::Evt, opcode, payload.into());
        let wire = packet.encode(self.shared.config.shape)?;

        {
            let mut session = self.shared.lock();
            if session.closed {
                return Err(RpcError::Closed);
            }
            if let Some((in_flight, _)) = session.pending_ack {
                return Err(RpcError::EventInFlight { opcode: in_flight });
            }
            session.pending_ack = Some((opcode, None));
        }

        let result = self.finish_event(opcode, &wire, timeout, deadline);

        self.shared.lock().pending_ack = None;
        result
    }

    fn finish_event(
        &self,
        opcode: u16,
        wire: &[u8],
        timeout: Duration,
        deadline: Instant,
    ) -> Result<RpcPacket> {
        let timed_out = || RpcError::AsyncTimeout { opcode, timeout };

        self.shared
            .wait_for(deadline, |session| session.established())
            .ok_or_else(timed_out)??;

        debug!(channel = %self.label(), opcode, "sending event");
        self.shared.sink.send(wire)?;

        self.shared
            .wait_for(deadline, |session| {
                if let Some((_, ack)) = session.pending_ack.as_mut() {
                    if let Some(ack) = ack.take() {
                        return Some(Ok(ack));
                    }
                }
                session.closed.then_some(Err(RpcError::Closed))
            })
            .ok_or_else(timed_out)?
    }

    /// Pop the oldest received event, waiting up to `timeout` for one.
    pub fn get_evt(&self, timeout: Duration) -> Result<RpcPacket> {
        let deadline = deadline_after(timeout);
        self.shared
            .wait_for(deadline, |session| {
                if let Some(event) = session.events.pop_front() {
                    return Some(Ok(event));
                }
                session.closed.then_some(Err(RpcError::Closed))
            })
            .unwrap_or(Err(RpcError::EventTimeout(timeout)))
    }

    /// Acknowledge an event by opcode.
    pub fn ack(&self, opcode: u16) -> Result<()> {
        let packet = self.shared.outgoing(PacketKind::Ack, opcode, Bytes::new());
        self.shared.send_packet(&packet)
    }

    /// Drop queued events.
    pub fn clear_events(&self) {
        self.shared.lock().events.clear();
    }

    pub fn pending_events(&self) -> usize {
        self.shared.lock().events.len()
    }

    /// Route packets of `kind`/`opcode` to `handler`, replacing any previous one.
    pub fn register_handler<F>(&self, kind: PacketKind, opcode: u16, handler: F)
    where
        F: Fn(&HandlerContext<'_>, &RpcPacket) + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((kind, opcode), Arc::new(handler));
    }

    /// Handler for packets no registered handler matches.
    pub fn set_default_handler<F>(&self, handler: F)
    where
        F: Fn(&HandlerContext<'_>, &RpcPacket) + Send + Sync + 'static,
    {
        *self
            .shared
            .default_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Where LOG packets go. Without a sink they are dropped.
    pub fn set_log_sink(&self, sink: Arc<dyn LogSink>) {
        *self
            .shared
            .log_sink
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    /// Stop the receive thread and fail any blocked callers with [`RpcError::Closed`].
    ///
    /// Must not be called from a handler.
    pub fn close(&self) {
        {
            let mut session = self.shared.lock();
            if session.closed {
                return;
            }
            session.closed = true;
            session.state = ChannelState::Disconnected;
        }
        self.shared.changed.notify_all();

        if let Some(mut link) = self.link_slot().take() {
            link.close();
        }
        info!(channel = %self.label(), "rpc channel closed");
    }

    fn link_slot(&self) -> MutexGuard<'_, Option<FrameLink>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RpcChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChannel")
            .field("label", &self.label())
            .field("shape", &self.shared.config.shape)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until `poll` yields an outcome or `deadline` passes (`None`).
    fn wait_for<T, F>(&self, deadline: Instant, mut poll: F) -> Option<Result<T>>
    where
        F: FnMut(&mut Session) -> Option<Result<T>>,
    {
        let mut session = self.lock();
        loop {
            if let Some(outcome) = poll(&mut session) {
                return Some(outcome);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            session = self
                .changed
                .wait_timeout(session, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let result = f(&mut self.lock());
        self.changed.notify_all();
        result
    }

    fn outgoing(&self, kind: PacketKind, opcode: u16, payload: Bytes) -> RpcPacket {
        let packet = RpcPacket::new(kind, opcode, payload);
        match self.config.shape {
            HeaderShape::Addressed => packet.with_addressing(Addressing {
                src: 0,
                dst: BROADCAST,
                group_src: self.config.handshake.local_group_id,
                group_dst: self.lock().remote_group_id,
            }),
            HeaderShape::Simple => packet,
        }
    }

    fn send_packet(&self, packet: &RpcPacket) -> Result<()> {
        let wire = packet.encode(self.config.shape)?;
        self.sink.send(&wire)?;
        Ok(())
    }

    fn handle_payload(&self, payload: Bytes) {
        let label = &self.config.label;
        let packet = match RpcPacket::decode(payload, self.config.shape) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(channel = %label, %err, "dropping undecodable packet");
                return;
            }
        };
        debug!(channel = %label, %packet, "handling packet");

        match packet.kind {
            PacketKind::Init => self.on_init(&packet),
            PacketKind::InitRsp => self.on_init_response(),
            PacketKind::Evt => self.on_event(packet),
            PacketKind::Ack => self.on_ack(packet),
            PacketKind::Rsp => self.on_response(packet),
            PacketKind::Log => self.on_log(&packet),
            PacketKind::Cmd | PacketKind::Err => self.dispatch(&packet),
        }
    }

    fn restart_session(&self) {
        if let Err(err) = self.sink.clear_buffers() {
            warn!(channel = %self.config.label, %err, "failed to clear transport buffers");
        }
        self.lock().events.clear();
    }

    fn on_init(&self, packet: &RpcPacket) {
        let label = &self.config.label;
        self.restart_session();

        match self.config.shape {
            HeaderShape::Addressed => {
                if let Err(err) = self.config.handshake.validate(&packet.payload) {
                    error!(channel = %label, %err, "rejecting device");
                    self.update(|session| {
                        session.state = ChannelState::Rejected;
                        session.rejection = Some(err.to_string());
                    });
                    return;
                }

                let remote = packet.addressing.map_or(0, |a| a.group_src);
                self.update(|session| {
                    session.state = ChannelState::Handshaking;
                    session.remote_group_id = remote;
                });

                let reply = self.config.handshake.init_reply(remote);
                if let Err(err) = self.send_packet(&reply) {
                    warn!(channel = %label, %err, "failed to answer INIT");
                    return;
                }

                self.update(|session| {
                    session.state = ChannelState::Established;
                    session.rejection = None;
                });
                info!(channel = %label, remote_group = remote, "channel established");
            }
            HeaderShape::Simple => {
                self.update(|session| session.state = ChannelState::Handshaking);
                let reply = RpcPacket::new(PacketKind::Init, 0, Bytes::new());
                if let Err(err) = self.send_packet(&reply) {
                    warn!(channel = %label, %err, "failed to answer INIT");
                }
            }
        }
    }

    fn on_init_response(&self) {
        let label = &self.config.label;
        self.restart_session();

        let reply = RpcPacket::new(PacketKind::InitRsp, 0, Bytes::new());
        if let Err(err) = self.send_packet(&reply) {
            warn!(channel = %label, %err, "failed to answer INITRSP");
            return;
        }

        self.update(|session| {
            session.state = ChannelState::Established;
            session.rejection = None;
        });
        info!(channel = %label, "channel established");
    }

    fn on_event(&self, packet: RpcPacket) {
        let opcode = packet.opcode;
        self.update(|session| session.events.push_back(packet));

        let ack = self.outgoing(PacketKind::Ack, opcode, Bytes::new());
        if let Err(err) = self.send_packet(&ack) {
            warn!(channel = %self.config.label, opcode, %err, "failed to acknowledge event");
        }
    }

    fn on_ack(&self, packet: RpcPacket) {
        let label = &self.config.label;
        let opcode = packet.opcode;
        let mut session = self.lock();
        match session.pending_ack.as_mut() {
            Some((expected, slot)) if *expected == opcode && slot.is_none() => {
                *slot = Some(packet);
            }
            Some((expected, _)) => {
                warn!(channel = %label, expected = *expected, got = opcode, "dropping mismatched ACK");
                return;
            }
            None => {
                warn!(channel = %label, opcode, "dropping unexpected ACK");
                return;
            }
        }
        drop(session);
        self.changed.notify_all();
    }

    fn on_response(&self, packet: RpcPacket) {
        let label = &self.config.label;
        let opcode = packet.opcode;
        let mut session = self.lock();
        let in_flight = session.command;
        match in_flight {
            Some(expected) if expected == opcode && session.response.is_none() => {
                session.response = Some(packet);
            }
            Some(expected) => {
                warn!(channel = %label, expected, got = opcode, "dropping mismatched response");
                return;
            }
            None => {
                warn!(channel = %label, opcode, "dropping unexpected response");
                return;
            }
        }
        drop(session);
        self.changed.notify_all();
    }

    fn on_log(&self, packet: &RpcPacket) {
        let label = &self.config.label;
        let text = match std::str::from_utf8(&packet.payload) {
            Ok(text) => text,
            Err(_) => {
                debug!(channel = %label, "dropping malformed log packet");
                return;
            }
        };

        let sink = self
            .log_sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sink {
            Some(sink) => sink.append(text),
            None => debug!(channel = %label, "no log sink, dropping device log"),
        }
    }

    fn dispatch(&self, packet: &RpcPacket) {
        let key = (packet.kind, packet.opcode);
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .or_else(|| {
                self.default_handler
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            });

        let Some(handler) = handler else {
            warn!(channel = %self.config.label, %packet, "unhandled packet");
            return;
        };

        let ctx = HandlerContext { shared: self };
        if panic::catch_unwind(AssertUnwindSafe(|| handler(&ctx, packet))).is_err() {
            error!(channel = %self.config.label, %packet, "packet handler panicked");
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64))
}
