//! A TCP relay: one [`Broker`] fans envelopes out to every connected
//! [`RelayNode`] subscribed to the envelope's channel, the publishing node
//! included. Frames are defined in [`crate::wire`].
//!
//! The relay forwards what it is given and nothing more. Envelopes published
//! before a subscription is acknowledged are not replayed, and a connection
//! that falls too far behind loses envelopes (it is told how many).

use std::{
    collections::{HashMap, HashSet, VecDeque},
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{Publish, Receiver};
use crate::{
    envelope::Envelope,
    error::TransportError,
    wire::{BrokerFrame, ClientFrame, parse_frame, read_frame, write_frame},
};

type ConnectionId = u64;

pub struct Broker {
    listener: TcpListener,
    state: Arc<BrokerState>,
}

impl Broker {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            state: Arc::new(BrokerState::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Broker { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("broker shutting down");
                    state.publish(BrokerEvent::Shutdown);
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<BrokerState>,
) {
    match result {
        Ok((stream, peer)) => {
            let state = Arc::clone(state);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, state).await {
                    warn!(peer = %peer, error = ?err, "relay connection closed with error");
                }
            });
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

#[derive(Debug, Clone)]
enum BrokerEvent {
    Routed { channel: String, envelope: Envelope },
    Shutdown,
}

struct BrokerState {
    events: broadcast::Sender<BrokerEvent>,
    next_id: AtomicU64,
}

impl BrokerState {
    fn new() -> Self {
        // Slow connections are told how many envelopes they skipped once this fills up.
        let (events, _) = broadcast::channel(1024);
        Self {
            events,
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn publish(&self, event: BrokerEvent) {
        // No receivers simply means nobody is connected.
        if self.events.send(event).is_err() {
            debug!("no connections to route event to");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<BrokerState>) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let id = state.next_id();
    let (reader, mut writer) = stream.into_split();
    // `next_line` is cancel safe, so a partially read frame survives a lost race.
    let mut lines = BufReader::new(reader).lines();
    let mut events = state.subscribe();
    let mut channels = HashSet::new();

    info!(?peer, id, "relay connection opened");

    loop {
        select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if let Some(frame) = parse_frame::<ClientFrame>(&line)? {
                    handle_client_frame(frame, &state, &mut writer, &mut channels).await?;
                }
            }
            event = events.recv() => {
                if !handle_event(event, &mut writer, &channels).await? {
                    break;
                }
            }
        }
    }

    info!(?peer, id, "relay connection closed");
    Ok(())
}

async fn handle_client_frame(
    frame: ClientFrame,
    state: &BrokerState,
    writer: &mut OwnedWriteHalf,
    channels: &mut HashSet<String>,
) -> Result<()> {
    match frame {
        ClientFrame::Subscribe { channel } => {
            debug!(%channel, "subscribe");
            channels.insert(channel.clone());
            write_frame(writer, &BrokerFrame::Subscribed { channel }).await?;
        }
        ClientFrame::Unsubscribe { channel } => {
            debug!(%channel, "unsubscribe");
            channels.remove(&channel);
        }
        ClientFrame::Publish { channel, envelope } => {
            state.publish(BrokerEvent::Routed { channel, envelope });
        }
    }
    Ok(())
}

async fn handle_event(
    event: Result<BrokerEvent, broadcast::error::RecvError>,
    writer: &mut OwnedWriteHalf,
    channels: &HashSet<String>,
) -> Result<bool> {
    match event {
        Ok(BrokerEvent::Routed { channel, envelope }) => {
            if channels.contains(&channel) {
                write_frame(writer, &BrokerFrame::Deliver { channel, envelope }).await?;
            }
            Ok(true)
        }
        Ok(BrokerEvent::Shutdown) => {
            let notice = BrokerFrame::Error {
                message: "broker shutting down".to_string(),
            };
            if let Err(err) = write_frame(writer, &notice).await {
                debug!(?err, "failed to send shutdown notice");
            }
            Ok(false)
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            let warning = BrokerFrame::Error {
                message: format!("connection fell behind, {skipped} envelopes were dropped"),
            };
            write_frame(writer, &warning).await?;
            Ok(true)
        }
        Err(broadcast::error::RecvError::Closed) => Ok(false),
    }
}

#[derive(Default)]
struct PendingAcks {
    closed: bool,
    // The broker answers subscribe frames in the order they were sent.
    waiters: HashMap<String, VecDeque<oneshot::Sender<()>>>,
}

struct NodeShared {
    receivers: RwLock<HashMap<String, Vec<Arc<dyn Receiver>>>>,
    pending: Mutex<PendingAcks>,
    closed: watch::Sender<bool>,
}

impl NodeShared {
    fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            receivers: RwLock::new(HashMap::new()),
            pending: Mutex::new(PendingAcks::default()),
            closed,
        }
    }

    fn deliver(&self, channel: &str, envelope: Envelope) {
        let receivers = self.receivers.read().get(channel).cloned().unwrap_or_default();
        for receiver in receivers {
            receiver.receive(envelope.clone());
        }
    }

    fn acknowledge(&self, channel: &str) {
        let mut pending = self.pending.lock();
        let Some(queue) = pending.waiters.get_mut(channel) else {
            return;
        };
        if let Some(waiter) = queue.pop_front() {
            let _ = waiter.send(());
        }
        if queue.is_empty() {
            pending.waiters.remove(channel);
        }
    }

    fn detach(&self, channel: &str, receiver: &Arc<dyn Receiver>) {
        let mut receivers = self.receivers.write();
        if let Some(attached) = receivers.get_mut(channel) {
            attached.retain(|candidate| !Arc::ptr_eq(candidate, receiver));
            if attached.is_empty() {
                receivers.remove(channel);
            }
        }
    }

    /// Fails every outstanding and future subscribe and wakes `closed` waiters.
    fn close(&self) {
        {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.waiters.clear();
        }
        self.closed.send_replace(true);
    }
}

/// Client side of the relay. Inbound envelopes are handed to receivers on the
/// node's reader task.
pub struct RelayNode {
    shared: Arc<NodeShared>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    reader_task: JoinHandle<()>,
}

impl RelayNode {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to relay at {addr}"))?;
        let (reader, writer) = stream.into_split();

        let shared = Arc::new(NodeShared::new());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_writer(writer, outbound_rx));
        let reader_task = tokio::spawn(run_reader(BufReader::new(reader), Arc::clone(&shared)));

        debug!(%addr, "connected to relay");
        Ok(Self {
            shared,
            outbound,
            reader_task,
        })
    }

    pub fn publisher(&self, channel: impl Into<String>) -> RelayPublisher {
        RelayPublisher {
            channel: channel.into(),
            outbound: self.outbound.clone(),
        }
    }

    /// Attaches `receiver` to `channel` and waits until the broker has
    /// acknowledged this subscribe request. Fails with
    /// [`TransportError::Closed`] once the broker connection is gone, leaving
    /// no trace of the receiver behind.
    pub async fn subscribe(
        &self,
        channel: impl Into<String>,
        receiver: Arc<dyn Receiver>,
    ) -> Result<(), TransportError> {
        let channel = channel.into();
        let closed = || TransportError::Closed {
            channel: channel.clone(),
        };

        let ack_rx = {
            let mut pending = self.shared.pending.lock();
            if pending.closed {
                return Err(closed());
            }

            self.shared
                .receivers
                .write()
                .entry(channel.clone())
                .or_default()
                .push(Arc::clone(&receiver));

            let frame = ClientFrame::Subscribe {
                channel: channel.clone(),
            };
            if self.outbound.send(frame).is_err() {
                self.shared.detach(&channel, &receiver);
                return Err(closed());
            }

            let (ack_tx, ack_rx) = oneshot::channel();
            pending
                .waiters
                .entry(channel.clone())
                .or_default()
                .push_back(ack_tx);
            ack_rx
        };

        if ack_rx.await.is_err() {
            self.shared.detach(&channel, &receiver);
            return Err(closed());
        }
        Ok(())
    }

    pub fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.shared.receivers.write().remove(channel);
        self.outbound
            .send(ClientFrame::Unsubscribe {
                channel: channel.to_string(),
            })
            .map_err(|_| TransportError::Closed {
                channel: channel.to_string(),
            })
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Resolves once the broker connection has ended.
    pub async fn closed(&self) {
        let mut closed = self.shared.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl Drop for RelayNode {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn run_writer(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<ClientFrame>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = write_frame(&mut writer, &frame).await {
            warn!(error = ?err, "failed to write relay frame");
            return;
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(error = ?err, "failed to shutdown relay writer cleanly");
    }
}

async fn run_reader(mut reader: BufReader<OwnedReadHalf>, shared: Arc<NodeShared>) {
    loop {
        match read_frame::<_, BrokerFrame>(&mut reader).await {
            Ok(Some(BrokerFrame::Deliver { channel, envelope })) => {
                shared.deliver(&channel, envelope);
            }
            Ok(Some(BrokerFrame::Subscribed { channel })) => shared.acknowledge(&channel),
            Ok(Some(BrokerFrame::Error { message })) => warn!(%message, "relay reported an error"),
            Ok(None) => {
                debug!("relay closed the connection");
                break;
            }
            Err(err) => {
                warn!(error = ?err, "failed to read relay frame");
                break;
            }
        }
    }

    shared.close();
}

#[derive(Clone)]
pub struct RelayPublisher {
    channel: String,
    outbound: mpsc::UnboundedSender<ClientFrame>,
}

impl Publish for RelayPublisher {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.outbound
            .send(ClientFrame::Publish {
                channel: self.channel.clone(),
                envelope,
            })
            .map_err(|_| TransportError::Closed {
                channel: self.channel.clone(),
            })
    }
}
