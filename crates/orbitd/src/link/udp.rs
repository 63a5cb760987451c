//! LAN radio link — multicast advertisements plus a TCP channel.
//!
//! Advertise role: a periodic task multicasts `AdvertisementFrame`s on the
//! configured group. Scan role: a listener joined to the same group parses
//! frames, drops its own (by node id), and reports every sighting; scan
//! duplicates are deliberate, they refresh peer liveness.
//!
//! Channel role: each node runs a TCP accept loop on its advertised session
//! port. A client connection probes for the well-known channel, subscribes
//! to pushes, and writes ping envelopes; the server answers probes, tracks
//! subscribers, and fans out pushes. Frames are the length-prefixed codec
//! from orbit-core.
//!
//! A LAN datagram carries no measured received power, so the advertised
//! transmit power is reported as the raw signal sample; a physical radio
//! backend would report true RSSI here instead.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zerocopy::{AsBytes, FromBytes};

use orbit_core::config::RadioConfig;
use orbit_core::wire::{ping_channel_id, AdvertisementFrame, ChannelFrame, FrameKind};
use orbit_core::{PeerToken, RadioState};

use crate::radio::{
    RadioCommand, RadioEvent, RadioPort, COMMAND_CHANNEL_CAPACITY, EVENT_CHANNEL_CAPACITY,
};

/// Buffered outbound frames per connection.
const WRITE_QUEUE_CAPACITY: usize = 32;

/// The LAN link.
pub struct UdpLink;

impl UdpLink {
    /// Spawn the link task for the given radio config.
    /// Fails fast on an unparseable multicast group; socket errors after
    /// this point surface as power-state events instead.
    pub fn spawn(config: &RadioConfig) -> Result<RadioPort> {
        let group: Ipv4Addr = config
            .advertise_group
            .parse()
            .with_context(|| format!("bad multicast group '{}'", config.advertise_group))?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let node_id: [u8; 8] = rand::random();
        tracing::info!(node_id = %hex::encode(node_id), "udp link starting");

        let link = LinkTask {
            group,
            advertise_port: config.advertise_port,
            announce_interval: Duration::from_millis(config.announce_interval_ms),
            requested_session_port: config.session_port,
            tx_power_dbm: config.tx_power_dbm,
            node_id,
            event_tx,
            command_rx,
            internal_tx,
            internal_rx,
            next_token: Arc::new(AtomicU64::new(1)),
            session_port: 0,
            advertise_task: None,
            scan_task: None,
            server_task: None,
            endpoints: HashMap::new(),
            peer_addrs: HashMap::new(),
            connections: HashMap::new(),
            subscribers: HashMap::new(),
        };
        tokio::spawn(link.run());

        Ok(RadioPort {
            commands: command_tx,
            events: event_rx,
        })
    }
}

/// Messages from helper tasks back into the link actor.
enum Internal {
    /// The scan loop saw an advertisement from a remote endpoint.
    Observed {
        endpoint: SocketAddr,
        name: Option<String>,
        tx_power_dbm: i8,
    },
    /// An outbound dial completed.
    ConnEstablished { token: PeerToken, stream: TcpStream },
    /// A client-side connection ended (EOF, error, or corrupt stream).
    ConnClosed { token: PeerToken },
    /// A remote client subscribed on our server; `push` delivers to it.
    Subscribed {
        token: PeerToken,
        push: mpsc::Sender<Vec<u8>>,
    },
}

/// Client-side connection bookkeeping.
struct Connection {
    write_tx: mpsc::Sender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

struct LinkTask {
    group: Ipv4Addr,
    advertise_port: u16,
    announce_interval: Duration,
    requested_session_port: u16,
    tx_power_dbm: i8,
    node_id: [u8; 8],

    event_tx: mpsc::Sender<RadioEvent>,
    command_rx: mpsc::Receiver<RadioCommand>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
    next_token: Arc<AtomicU64>,

    /// Actual bound TCP port, advertised to peers. Zero until powered on.
    session_port: u16,
    advertise_task: Option<JoinHandle<()>>,
    scan_task: Option<JoinHandle<()>>,
    server_task: Option<JoinHandle<()>>,

    /// Remote session endpoint → token, and its reverse.
    endpoints: HashMap<SocketAddr, PeerToken>,
    peer_addrs: HashMap<PeerToken, SocketAddr>,

    /// Open client-side connections.
    connections: HashMap<PeerToken, Connection>,
    /// Server-side subscribers and their push queues.
    subscribers: HashMap<PeerToken, mpsc::Sender<Vec<u8>>>,
}

impl LinkTask {
    async fn run(mut self) {
        self.power_on().await;

        loop {
            tokio::select! {
                maybe_command = self.command_rx.recv() => match maybe_command {
                    Some(command) => self.handle_command(command).await,
                    // Engine gone; tear the link down.
                    None => break,
                },

                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal).await,
            }
        }

        self.shutdown();
    }

    /// Bring the channel server up; its bound port goes into advertisements.
    async fn power_on(&mut self) {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.requested_session_port));
        match TcpListener::bind(bind_addr).await {
            Ok(listener) => {
                self.session_port = listener
                    .local_addr()
                    .map(|a| a.port())
                    .unwrap_or(self.requested_session_port);
                tracing::info!(port = self.session_port, "channel server listening");

                let event_tx = self.event_tx.clone();
                let internal_tx = self.internal_tx.clone();
                let next_token = self.next_token.clone();
                self.server_task = Some(tokio::spawn(accept_loop(
                    listener, event_tx, internal_tx, next_token,
                )));

                self.emit(RadioEvent::StateChanged {
                    state: RadioState::PoweredOn,
                })
                .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to bind channel server, radio stays off");
                self.emit(RadioEvent::StateChanged {
                    state: RadioState::PoweredOff,
                })
                .await;
            }
        }
    }

    async fn handle_command(&mut self, command: RadioCommand) {
        match command {
            RadioCommand::StartAdvertising { local_name } => self.start_advertising(&local_name),
            RadioCommand::StopAdvertising => {
                if let Some(task) = self.advertise_task.take() {
                    task.abort();
                    tracing::debug!("advertising stopped");
                }
            }
            RadioCommand::StartScanning => self.start_scanning(),
            RadioCommand::StopScanning => {
                if let Some(task) = self.scan_task.take() {
                    task.abort();
                    tracing::debug!("scanning stopped");
                }
            }
            RadioCommand::Connect { token } => self.connect(token),
            RadioCommand::DiscoverChannel { token } => {
                let probe = ChannelFrame::new(FrameKind::Probe, ping_channel_id().to_vec());
                if !self.send_on_connection(token, probe).await {
                    self.emit(RadioEvent::ChannelDiscoveryFailed { token }).await;
                }
            }
            RadioCommand::Subscribe { token } => {
                let subscribe = ChannelFrame::new(FrameKind::Subscribe, Vec::new());
                if !self.send_on_connection(token, subscribe).await {
                    tracing::debug!(%token, "subscribe on a dead connection");
                }
            }
            RadioCommand::Write { token, payload } => {
                let write = ChannelFrame::new(FrameKind::Write, payload);
                if !self.send_on_connection(token, write).await {
                    // Write failures are non-fatal by design; the peer's
                    // disconnect will surface through the reader.
                    tracing::debug!(%token, "write on a dead connection");
                }
            }
            RadioCommand::NotifySubscribers { payload } => {
                let push = ChannelFrame::new(FrameKind::Push, payload).to_bytes();
                self.subscribers
                    .retain(|token, push_tx| match push_tx.try_send(push.clone()) {
                        Ok(()) => true,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::debug!(%token, "subscriber push queue full, dropping push");
                            true
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => false,
                    });
            }
            RadioCommand::Disconnect { token } => {
                if let Some(connection) = self.connections.remove(&token) {
                    connection.abort();
                    self.emit(RadioEvent::Disconnected { token }).await;
                }
            }
        }
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Observed {
                endpoint,
                name,
                tx_power_dbm,
            } => {
                let token = match self.endpoints.get(&endpoint) {
                    Some(token) => *token,
                    None => {
                        let token = PeerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
                        self.endpoints.insert(endpoint, token);
                        self.peer_addrs.insert(token, endpoint);
                        tracing::debug!(%token, %endpoint, "new endpoint observed");
                        token
                    }
                };
                self.emit(RadioEvent::AdvertisementObserved {
                    token,
                    name,
                    signal_dbm: tx_power_dbm as f64,
                })
                .await;
            }

            Internal::ConnEstablished { token, stream } => {
                if self.connections.contains_key(&token) {
                    // A duplicate dial lost the race; keep the first.
                    return;
                }
                let connection = spawn_client_connection(
                    token,
                    stream,
                    self.event_tx.clone(),
                    self.internal_tx.clone(),
                );
                self.connections.insert(token, connection);
                self.emit(RadioEvent::Connected { token }).await;
            }

            Internal::ConnClosed { token } => {
                if let Some(connection) = self.connections.remove(&token) {
                    connection.abort();
                    self.emit(RadioEvent::Disconnected { token }).await;
                }
            }

            Internal::Subscribed { token, push } => {
                self.subscribers.insert(token, push);
                self.emit(RadioEvent::SubscriberJoined { subscriber: token })
                    .await;
            }
        }
    }

    fn start_advertising(&mut self, local_name: &str) {
        if self.advertise_task.is_some() {
            return; // idempotent
        }
        if self.session_port == 0 {
            tracing::debug!("radio not powered on, advertising request ignored");
            return;
        }

        let frame =
            AdvertisementFrame::new(self.node_id, self.session_port, self.tx_power_dbm, local_name);
        let dest = SocketAddr::from((self.group, self.advertise_port));
        let interval = self.announce_interval;
        let event_tx = self.event_tx.clone();

        self.advertise_task = Some(tokio::spawn(async move {
            let socket = match make_advertise_socket() {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to create advertise socket");
                    let _ = event_tx
                        .send(RadioEvent::StateChanged {
                            state: RadioState::PoweredOff,
                        })
                        .await;
                    return;
                }
            };

            let bytes = frame.as_bytes().to_vec();
            let mut ticker = tokio::time::interval(interval);
            tracing::info!(%dest, interval_ms = interval.as_millis() as u64, "advertising started");

            loop {
                ticker.tick().await;
                match socket.send_to(&bytes, dest).await {
                    Ok(n) => tracing::trace!(bytes = n, "advertisement sent"),
                    Err(e) => tracing::warn!(error = %e, "advertisement send failed"),
                }
            }
        }));
    }

    fn start_scanning(&mut self) {
        if self.scan_task.is_some() {
            return; // idempotent
        }

        let group = self.group;
        let port = self.advertise_port;
        let own_node_id = self.node_id;
        let event_tx = self.event_tx.clone();
        let internal_tx = self.internal_tx.clone();

        self.scan_task = Some(tokio::spawn(async move {
            let socket = match make_scan_socket(group, port) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to create scan socket");
                    let _ = event_tx
                        .send(RadioEvent::StateChanged {
                            state: RadioState::PoweredOff,
                        })
                        .await;
                    return;
                }
            };

            tracing::info!(%group, port, "scanning started");
            let mut buf = vec![0u8; 256];

            loop {
                let (len, source) = match socket.recv_from(&mut buf).await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "scan recv_from failed");
                        continue;
                    }
                };

                let frame = match AdvertisementFrame::read_from_prefix(&buf[..len]) {
                    Some(f) => f,
                    None => {
                        tracing::trace!(len, "runt datagram on advertise port");
                        continue;
                    }
                };

                if !frame.is_valid() {
                    tracing::trace!("foreign or stale-version advertisement ignored");
                    continue;
                }
                if frame.node_id == own_node_id {
                    continue; // multicast loopback of our own frame
                }

                let endpoint = SocketAddr::new(source.ip(), frame.session_port);
                let observed = Internal::Observed {
                    endpoint,
                    name: frame.display_name(),
                    tx_power_dbm: frame.tx_power_dbm,
                };
                if internal_tx.send(observed).await.is_err() {
                    return;
                }
            }
        }));
    }

    fn connect(&mut self, token: PeerToken) {
        if self.connections.contains_key(&token) {
            tracing::debug!(%token, "already connected, ignoring dial request");
            return;
        }
        let addr = match self.peer_addrs.get(&token) {
            Some(addr) => *addr,
            None => {
                tracing::debug!(%token, "dial request for unknown endpoint");
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let _ = event_tx.send(RadioEvent::ConnectFailed { token }).await;
                });
                return;
            }
        };

        let event_tx = self.event_tx.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let _ = internal_tx
                        .send(Internal::ConnEstablished { token, stream })
                        .await;
                }
                Err(e) => {
                    tracing::debug!(%token, %addr, error = %e, "dial failed");
                    let _ = event_tx.send(RadioEvent::ConnectFailed { token }).await;
                }
            }
        });
    }

    /// Queue a frame on a client connection. False when no connection or
    /// its queue is gone.
    async fn send_on_connection(&mut self, token: PeerToken, frame: ChannelFrame) -> bool {
        match self.connections.get(&token) {
            Some(connection) => connection.write_tx.send(frame.to_bytes()).await.is_ok(),
            None => false,
        }
    }

    async fn emit(&self, event: RadioEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::warn!("engine closed the event channel");
        }
    }

    fn shutdown(&mut self) {
        for task in [
            self.advertise_task.take(),
            self.scan_task.take(),
            self.server_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        for (_, connection) in self.connections.drain() {
            connection.abort();
        }
        self.subscribers.clear();
        tracing::info!("udp link shut down");
    }
}

// ── Client-side connection ────────────────────────────────────────────────────

/// Split a dialed stream into a writer queue and a reader loop that maps
/// channel frames back to radio events.
fn spawn_client_connection(
    token: PeerToken,
    stream: TcpStream,
    event_tx: mpsc::Sender<RadioEvent>,
    internal_tx: mpsc::Sender<Internal>,
) -> Connection {
    let (read_half, write_half) = stream.into_split();
    let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);

    let writer = tokio::spawn(write_loop(write_half, write_rx));
    let reader = tokio::spawn(async move {
        let mut read_half = read_half;
        let mut buf = BytesMut::with_capacity(1024);

        while let Some(frame) = read_next_frame(&mut read_half, &mut buf).await {
            let event = match frame.kind {
                FrameKind::ProbeAck => {
                    if frame.payload == ping_channel_id() {
                        RadioEvent::ChannelDiscovered { token }
                    } else {
                        RadioEvent::ChannelDiscoveryFailed { token }
                    }
                }
                FrameKind::SubscribeAck => RadioEvent::SubscriptionActive { token },
                FrameKind::Push => RadioEvent::Notification {
                    token,
                    payload: frame.payload,
                },
                other => {
                    tracing::trace!(%token, kind = ?other, "unexpected frame on client side");
                    continue;
                }
            };
            if event_tx.send(event).await.is_err() {
                return;
            }
        }

        let _ = internal_tx.send(Internal::ConnClosed { token }).await;
    });

    Connection {
        write_tx,
        reader,
        writer,
    }
}

// ── Server side ───────────────────────────────────────────────────────────────

/// Accept inbound channel connections forever.
async fn accept_loop(
    listener: TcpListener,
    event_tx: mpsc::Sender<RadioEvent>,
    internal_tx: mpsc::Sender<Internal>,
    next_token: Arc<AtomicU64>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                tracing::debug!(%remote, "inbound channel connection");
                tokio::spawn(serve_channel(
                    stream,
                    event_tx.clone(),
                    internal_tx.clone(),
                    next_token.clone(),
                ));
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Serve one inbound connection: answer probes for the well-known channel,
/// register a subscription, and surface writes.
async fn serve_channel(
    stream: TcpStream,
    event_tx: mpsc::Sender<RadioEvent>,
    internal_tx: mpsc::Sender<Internal>,
    next_token: Arc<AtomicU64>,
) {
    let (read_half, write_half) = stream.into_split();
    let (write_tx, write_rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_CAPACITY);
    let writer = tokio::spawn(write_loop(write_half, write_rx));

    let mut read_half = read_half;
    let mut buf = BytesMut::with_capacity(1024);
    let mut subscriber_token = None;

    while let Some(frame) = read_next_frame(&mut read_half, &mut buf).await {
        match frame.kind {
            FrameKind::Probe => {
                if frame.payload == ping_channel_id() {
                    let ack = ChannelFrame::new(FrameKind::ProbeAck, ping_channel_id().to_vec());
                    if write_tx.send(ack.to_bytes()).await.is_err() {
                        break;
                    }
                } else {
                    tracing::trace!("probe for a channel we do not serve");
                }
            }

            FrameKind::Subscribe => {
                let ack = ChannelFrame::new(FrameKind::SubscribeAck, Vec::new());
                if write_tx.send(ack.to_bytes()).await.is_err() {
                    break;
                }
                if subscriber_token.is_none() {
                    let token = PeerToken(next_token.fetch_add(1, Ordering::Relaxed));
                    subscriber_token = Some(token);
                    let registered = internal_tx
                        .send(Internal::Subscribed {
                            token,
                            push: write_tx.clone(),
                        })
                        .await;
                    if registered.is_err() {
                        break;
                    }
                }
            }

            FrameKind::Write => {
                let delivered = event_tx
                    .send(RadioEvent::WriteReceived {
                        payload: frame.payload,
                    })
                    .await;
                if delivered.is_err() {
                    break;
                }
            }

            other => {
                tracing::trace!(kind = ?other, "unexpected frame on server side");
            }
        }
    }

    // Dropping write_tx ends the writer; a registered subscriber is pruned
    // on the next push attempt.
    drop(write_tx);
    writer.await.ok();
}

// ── Shared IO helpers ─────────────────────────────────────────────────────────

/// Forward queued byte blobs onto the socket until the queue closes or a
/// write fails.
async fn write_loop(mut half: OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = half.write_all(&bytes).await {
            tracing::debug!(error = %e, "channel write failed");
            return;
        }
    }
}

/// Read one frame, buffering as needed. `None` on EOF, error, or a corrupt
/// stream; the caller tears the connection down either way.
async fn read_next_frame(half: &mut OwnedReadHalf, buf: &mut BytesMut) -> Option<ChannelFrame> {
    loop {
        match ChannelFrame::decode(buf) {
            Ok(Some(frame)) => return Some(frame),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "corrupt channel stream");
                return None;
            }
        }

        match half.read_buf(buf).await {
            Ok(0) => return None,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "channel read failed");
                return None;
            }
        }
    }
}

// ── Socket setup ──────────────────────────────────────────────────────────────

/// UDP socket for sending multicast advertisements.
/// Loopback stays on so co-located nodes can discover each other; the
/// sender's own frames are filtered by node id instead.
fn make_advertise_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;
    // TTL 1 — link-local only, do not route beyond this link
    socket.set_multicast_ttl_v4(1).context("IP_MULTICAST_TTL")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&bind_addr.into()).context("bind()")?;

    UdpSocket::from_std(socket.into()).context("tokio UdpSocket")
}

/// UDP socket joined to the advertisement multicast group.
fn make_scan_socket(group: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&bind_addr.into()).context("bind()")?;
    socket
        .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
        .context("IP_ADD_MEMBERSHIP")?;

    UdpSocket::from_std(socket.into()).context("tokio UdpSocket")
}
