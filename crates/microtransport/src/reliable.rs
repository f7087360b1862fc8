//! # Reliable engine
//!
//! Connection-oriented transport over the same wire format as
//! [`crate::datagram`]: a three-way handshake, stop-and-wait
//! acknowledgement (at most one outstanding packet per channel_id), and a
//! FIN/ACK teardown. A single retransmission ticker wakes every 100 ms and
//! re-emits anything past its backoff deadline.
//!
//! ```text
//!   Closed ──SYN──▶ SynSent ──SYN|ACK──▶ Established ──FIN──▶ FinSent ──FIN|ACK──▶ Closed
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;
use rand::Rng as _;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::channel::Channel;
use crate::error::ReliableError;
use crate::wire::{Flags, PacketHeader};

/// Tunable parameters for the reliable engine. Defaults match the protocol
/// constants: 5s initial timeout, 2x backoff, 5 retries, 30s fragment expiry.
#[derive(Debug, Clone, Copy)]
pub struct ReliableConfig {
    pub mtu: usize,
    pub initial_timeout: Duration,
    pub backoff_factor: u32,
    pub max_retries: u32,
    pub fragment_timeout: Duration,
    pub ticker_interval: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        ReliableConfig {
            mtu: 248,
            initial_timeout: Duration::from_secs(5),
            backoff_factor: 2,
            max_retries: 5,
            fragment_timeout: Duration::from_secs(30),
            ticker_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Closed,
    SynSent,
    Established,
    FinSent,
}

struct ChannelState {
    conn: ConnState,
    next_send_seq: u16,
    last_recv_seq: Option<u16>,
}

impl ChannelState {
    fn fresh() -> Self {
        ChannelState {
            conn: ConnState::Closed,
            next_send_seq: 0,
            last_recv_seq: None,
        }
    }
}

struct PendingPacket {
    encoded: Bytes,
    channel: Arc<dyn Channel>,
    retries: u32,
    current_timeout: Duration,
    last_send: Instant,
}

struct Reassembly {
    fragments: HashMap<u16, Bytes>,
    cursor: usize,
    expires_at: Instant,
}

impl Reassembly {
    fn new(fragment_timeout: Duration) -> Self {
        Reassembly {
            fragments: HashMap::new(),
            cursor: 0,
            expires_at: Instant::now() + fragment_timeout,
        }
    }

    fn take_new_prefix(&mut self) -> Option<Bytes> {
        let mut prefix_end = self.cursor;
        while let Some(chunk) = self.fragments.get(&(prefix_end as u16)) {
            prefix_end += chunk.len();
        }
        if prefix_end == self.cursor {
            return None;
        }
        let mut out = Vec::with_capacity(prefix_end - self.cursor);
        let mut offset = self.cursor;
        while offset < prefix_end {
            let chunk = &self.fragments[&(offset as u16)];
            out.extend_from_slice(chunk);
            offset += chunk.len();
        }
        self.cursor = prefix_end;
        Some(Bytes::from(out))
    }
}

enum WaitOutcome {
    Acked,
    Failed,
}

struct Inner {
    config: ReliableConfig,
    channels: HashMap<u16, ChannelState>,
    pending: HashMap<(u16, u16), PendingPacket>,
    waiters: HashMap<(u16, u16), oneshot::Sender<WaitOutcome>>,
    reassembly: HashMap<(u16, u32), Reassembly>,
}

impl Inner {
    fn channel_state(&mut self, channel_id: u16) -> &mut ChannelState {
        self.channels.entry(channel_id).or_insert_with(ChannelState::fresh)
    }

    fn clear_channel(&mut self, channel_id: u16) {
        self.channels.remove(&channel_id);
        self.pending.retain(|(cid, _), _| *cid != channel_id);
        let failed: Vec<_> = self
            .waiters
            .keys()
            .filter(|(cid, _)| *cid == channel_id)
            .cloned()
            .collect();
        for key in failed {
            if let Some(tx) = self.waiters.remove(&key) {
                let _ = tx.send(WaitOutcome::Failed);
            }
        }
        self.reassembly.retain(|(cid, _), _| *cid != channel_id);
    }
}

/// A reliable, connection-oriented transport over one logical set of
/// channel_ids sharing a [`Channel`].
pub struct ReliableEngine {
    inner: Arc<Mutex<Inner>>,
    ticker: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl ReliableEngine {
    pub fn new(config: ReliableConfig) -> Self {
        ReliableEngine {
            inner: Arc::new(Mutex::new(Inner {
                config,
                channels: HashMap::new(),
                pending: HashMap::new(),
                waiters: HashMap::new(),
                reassembly: HashMap::new(),
            })),
            ticker: Arc::new(Mutex::new(None)),
        }
    }

    async fn ensure_ticker(&self) {
        let mut guard = self.ticker.lock().await;
        if guard.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let interval = {
            let inner = inner.lock().await;
            inner.config.ticker_interval
        };
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                Self::run_ticker_pass(&inner).await;
            }
        });
        *guard = Some(handle);
    }

    async fn run_ticker_pass(inner: &Arc<Mutex<Inner>>) {
        let mut inner = inner.lock().await;
        let now = Instant::now();
        let max_retries = inner.config.max_retries;
        let backoff_factor = inner.config.backoff_factor;

        let due: Vec<(u16, u16)> = inner
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_send) > p.current_timeout)
            .map(|(k, _)| *k)
            .collect();

        for key in due {
            let exhausted = inner
                .pending
                .get(&key)
                .map(|p| p.retries >= max_retries)
                .unwrap_or(false);

            if exhausted {
                inner.pending.remove(&key);
                if let Some(tx) = inner.waiters.remove(&key) {
                    let _ = tx.send(WaitOutcome::Failed);
                }
                warn!(channel_id = key.0, seq_no = key.1, "retransmit budget exhausted");
                continue;
            }

            if let Some(p) = inner.pending.get_mut(&key) {
                p.channel.emit(p.encoded.clone());
                p.retries += 1;
                p.current_timeout *= backoff_factor;
                p.last_send = now;
                debug!(channel_id = key.0, seq_no = key.1, retries = p.retries, "retransmitted");
            }
        }
    }

    async fn register_pending(
        &self,
        channel_id: u16,
        seq_no: u16,
        encoded: Bytes,
        channel: Arc<dyn Channel>,
    ) -> oneshot::Receiver<WaitOutcome> {
        let mut inner = self.inner.lock().await;
        let initial_timeout = inner.config.initial_timeout;
        inner.pending.insert(
            (channel_id, seq_no),
            PendingPacket {
                encoded: encoded.clone(),
                channel: Arc::clone(&channel),
                retries: 0,
                current_timeout: initial_timeout,
                last_send: Instant::now(),
            },
        );
        let (tx, rx) = oneshot::channel();
        inner.waiters.insert((channel_id, seq_no), tx);
        channel.emit(encoded);
        rx
    }

    fn cleanup_entry(inner_guard: &mut Inner, key: (u16, u16)) {
        inner_guard.pending.remove(&key);
        inner_guard.waiters.remove(&key);
    }

    /// Establish a connection on `channel_id`, sending a SYN and waiting up
    /// to `2 * initial_timeout` for the matching SYN|ACK.
    pub async fn connect(
        &self,
        channel: Arc<dyn Channel>,
        channel_id: u16,
    ) -> Result<(), ReliableError> {
        self.ensure_ticker().await;

        let (seq, wait_budget) = {
            let mut inner = self.inner.lock().await;
            let state = inner.channel_state(channel_id);
            state.conn = ConnState::SynSent;
            let seq = state.next_send_seq;
            (seq, inner.config.initial_timeout * 2)
        };

        let header = PacketHeader::new(Flags(Flags::SYN), channel_id, seq, 0);
        let encoded = header.encode()?;
        let rx = self.register_pending(channel_id, seq, encoded, channel).await;

        match timeout(wait_budget, rx).await {
            Ok(Ok(WaitOutcome::Acked)) => {
                let mut inner = self.inner.lock().await;
                Self::cleanup_entry(&mut inner, (channel_id, seq));
                let state = inner.channel_state(channel_id);
                state.conn = ConnState::Established;
                state.next_send_seq = state.next_send_seq.wrapping_add(1);
                Ok(())
            }
            _ => {
                let mut inner = self.inner.lock().await;
                Self::cleanup_entry(&mut inner, (channel_id, seq));
                inner.channel_state(channel_id).conn = ConnState::Closed;
                Err(ReliableError::ConnectionTimeout)
            }
        }
    }

    /// Send `payload` reliably on `channel_id`, connecting first if needed.
    /// Empty payloads are a no-op. Large payloads are fragmented; any single
    /// fragment timing out fails the whole send (earlier fragments are not
    /// retracted).
    pub async fn send(
        &self,
        channel: Arc<dyn Channel>,
        channel_id: u16,
        payload: &[u8],
    ) -> Result<(), ReliableError> {
        self.ensure_ticker().await;

        let established = {
            let mut inner = self.inner.lock().await;
            inner.channel_state(channel_id).conn == ConnState::Established
        };
        if !established {
            self.connect(Arc::clone(&channel), channel_id).await?;
        }

        if payload.is_empty() {
            return Ok(());
        }

        let (mtu, send_budget) = {
            let inner = self.inner.lock().await;
            (inner.config.mtu, inner.config.initial_timeout * 4)
        };

        if payload.len() <= mtu {
            self.send_one(Arc::clone(&channel), channel_id, payload, send_budget, None)
                .await
        } else {
            let frag_id: u32 = rand::rng().random();
            let max_payload = mtu.saturating_sub(6).max(1);
            let mut offset = 0usize;
            while offset < payload.len() {
                let end = (offset + max_payload).min(payload.len());
                let slice = &payload[offset..end];
                self.send_one(
                    Arc::clone(&channel),
                    channel_id,
                    slice,
                    send_budget,
                    Some((frag_id, offset as u16)),
                )
                .await?;
                offset = end;
            }
            Ok(())
        }
    }

    async fn send_one(
        &self,
        channel: Arc<dyn Channel>,
        channel_id: u16,
        payload: &[u8],
        budget: Duration,
        fragment: Option<(u32, u16)>,
    ) -> Result<(), ReliableError> {
        let seq = {
            let mut inner = self.inner.lock().await;
            inner.channel_state(channel_id).next_send_seq
        };

        let header = match fragment {
            Some((frag_id, frag_offset)) => PacketHeader::new_fragment(
                Flags::default(),
                channel_id,
                seq,
                payload.len() as u16,
                frag_id,
                frag_offset,
            ),
            None => PacketHeader::new(Flags::default(), channel_id, seq, payload.len() as u16),
        };
        let mut encoded = header.encode()?.to_vec();
        encoded.extend_from_slice(payload);

        let rx = self
            .register_pending(channel_id, seq, Bytes::from(encoded), channel)
            .await;

        match timeout(budget, rx).await {
            Ok(Ok(WaitOutcome::Acked)) => {
                let mut inner = self.inner.lock().await;
                Self::cleanup_entry(&mut inner, (channel_id, seq));
                inner.channel_state(channel_id).next_send_seq = seq.wrapping_add(1);
                Ok(())
            }
            _ => {
                let mut inner = self.inner.lock().await;
                Self::cleanup_entry(&mut inner, (channel_id, seq));
                Err(ReliableError::SendTimeout)
            }
        }
    }

    /// Tear down `channel_id`: send FIN and wait up to `2 * initial_timeout`
    /// for FIN|ACK. Returns [`ReliableError::NotEstablished`] if the channel
    /// never completed a handshake.
    pub async fn close(
        &self,
        channel: Arc<dyn Channel>,
        channel_id: u16,
    ) -> Result<(), ReliableError> {
        self.ensure_ticker().await;

        let (seq, wait_budget) = {
            let mut inner = self.inner.lock().await;
            let state = inner.channel_state(channel_id);
            if state.conn != ConnState::Established {
                return Err(ReliableError::NotEstablished(channel_id));
            }
            state.conn = ConnState::FinSent;
            let seq = state.next_send_seq;
            (seq, inner.config.initial_timeout * 2)
        };

        let header = PacketHeader::new(Flags(Flags::FIN), channel_id, seq, 0);
        let encoded = header.encode()?;
        let rx = self.register_pending(channel_id, seq, encoded, channel).await;

        match timeout(wait_budget, rx).await {
            Ok(Ok(WaitOutcome::Acked)) => {
                let mut inner = self.inner.lock().await;
                Self::cleanup_entry(&mut inner, (channel_id, seq));
                inner.channels.remove(&channel_id);
                Ok(())
            }
            _ => {
                let mut inner = self.inner.lock().await;
                Self::cleanup_entry(&mut inner, (channel_id, seq));
                inner.channels.remove(&channel_id);
                Err(ReliableError::CloseTimeout)
            }
        }
    }

    /// Poll `channel` once, advance the state machine, and return a
    /// payload if one was completed by this frame.
    pub async fn recv(
        &self,
        channel: Arc<dyn Channel>,
        channel_id: u16,
    ) -> Result<Option<Bytes>, ReliableError> {
        let Some(raw) = channel.poll() else {
            return Ok(None);
        };
        let mut buf = raw.clone();
        let header = PacketHeader::decode(&mut buf)?;

        let mut inner = self.inner.lock().await;

        if header.flags.is_rst() {
            inner.clear_channel(channel_id);
            return Ok(None);
        }

        if header.flags.is_syn() && !header.flags.is_ack() {
            let state = inner.channel_state(channel_id);
            state.conn = ConnState::Established;
            state.last_recv_seq = Some(header.seq_no);
            drop(inner);
            let reply = PacketHeader::new(Flags::syn_ack(), channel_id, 0, 0).encode()?;
            channel.emit(reply);
            return Ok(None);
        }

        if header.flags.is_fin() && !header.flags.is_ack() {
            let next_seq = {
                let state = inner.channel_state(channel_id);
                state.last_recv_seq = Some(header.seq_no);
                state.next_send_seq
            };
            inner.channels.remove(&channel_id);
            drop(inner);
            let reply =
                PacketHeader::new(Flags::fin_ack(), channel_id, next_seq, 0).encode()?;
            channel.emit(reply);
            return Ok(None);
        }

        if header.flags.is_ack() {
            let key = (channel_id, header.seq_no);
            if let Some(tx) = inner.waiters.remove(&key) {
                let _ = tx.send(WaitOutcome::Acked);
            } else {
                trace!(channel_id, seq_no = header.seq_no, "unsolicited ACK dropped");
            }
            return Ok(None);
        }

        // Data-bearing packet: ACK it and deliver (reassembling fragments
        // with the same greedy-prefix-plus-cursor semantics as the
        // datagram engine).
        let state = inner.channel_state(channel_id);
        state.last_recv_seq = Some(header.seq_no);
        let fragment_timeout = inner.config.fragment_timeout;

        let payload = if let Some(frag) = header.fragment {
            let key = (channel_id, frag.frag_id);
            let entry = inner
                .reassembly
                .entry(key)
                .or_insert_with(|| Reassembly::new(fragment_timeout));
            entry.expires_at = Instant::now() + fragment_timeout;
            entry.fragments.insert(frag.frag_offset, buf);
            entry.take_new_prefix()
        } else {
            Some(buf)
        };

        drop(inner);
        let ack = PacketHeader::new(Flags(Flags::ACK), channel_id, header.seq_no, 0).encode()?;
        channel.emit(ack);

        Ok(payload)
    }
}
