//! # Datagram engine
//!
//! Connectionless, best-effort send/receive with fragmentation of payloads
//! larger than the carrier MTU and reassembly on the receiving side.
//!
//! The reference this protocol was distilled from returns the *full*
//! reassembled prefix on every `recv` call, so a caller that polls
//! repeatedly observes the same bytes again and again. This engine instead
//! tracks a read cursor per in-flight message and returns only the bytes
//! past it — see the fragment assembler below.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;
use rand::Rng as _;

use crate::channel::Channel;
use crate::error::DatagramError;
use crate::wire::{Flags, PacketHeader};

/// How long an incomplete reassembly buffer is kept before being dropped.
pub const FRAGMENT_TIMEOUT: Duration = Duration::from_secs(30);

struct Reassembly {
    /// Fragments received so far, keyed by their byte offset in the message.
    fragments: HashMap<u16, Bytes>,
    /// Bytes of the contiguous prefix already returned to the caller.
    cursor: usize,
    expires_at: Instant,
}

impl Reassembly {
    fn new() -> Self {
        Reassembly {
            fragments: HashMap::new(),
            cursor: 0,
            expires_at: Instant::now() + FRAGMENT_TIMEOUT,
        }
    }

    /// Grow the contiguous prefix as far as available fragments allow, and
    /// return the slice beyond the previously-returned cursor, if any.
    fn take_new_prefix(&mut self) -> Option<Bytes> {
        let mut prefix_end = self.cursor;
        loop {
            match self.fragments.get(&(prefix_end as u16)) {
                Some(chunk) => prefix_end += chunk.len(),
                None => break,
            }
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

/// Fragments and reassembles payloads over a datagram [`Channel`].
pub struct DatagramEngine {
    mtu: usize,
    reassemblies: HashMap<(u16, u32), Reassembly>,
}

impl DatagramEngine {
    pub fn new(mtu: usize) -> Self {
        DatagramEngine {
            mtu,
            reassemblies: HashMap::new(),
        }
    }

    /// Send `payload` on `channel_id`, fragmenting if it exceeds the MTU.
    /// Empty payloads are a no-op.
    pub fn send(&mut self, channel: &dyn Channel, channel_id: u16, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        if payload.len() <= self.mtu {
            let header = PacketHeader::new(Flags::default(), channel_id, 0, payload.len() as u16);
            self.emit_framed(channel, &header, payload);
            return;
        }

        let frag_id: u32 = rand::rng().random();
        let max_payload = self.mtu.saturating_sub(6).max(1);
        let mut offset = 0usize;
        while offset < payload.len() {
            let end = (offset + max_payload).min(payload.len());
            let slice = &payload[offset..end];
            let header = PacketHeader::new_fragment(
                Flags::default(),
                channel_id,
                0,
                slice.len() as u16,
                frag_id,
                offset as u16,
            );
            self.emit_framed(channel, &header, slice);
            offset = end;
        }
    }

    fn emit_framed(&self, channel: &dyn Channel, header: &PacketHeader, payload: &[u8]) {
        let mut frame = header.encode().expect("well-formed header").to_vec();
        frame.extend_from_slice(payload);
        channel.emit(Bytes::from(frame));
    }

    /// Sweep expired reassembly buffers. Called before every [`Self::recv`].
    fn sweep_expired(&mut self) {
        let now = Instant::now();
        self.reassemblies.retain(|_, r| r.expires_at > now);
    }

    /// Poll `channel` once and return a payload if a complete (or newly
    /// grown) prefix is available for delivery.
    pub fn recv(&mut self, channel: &dyn Channel) -> Result<Option<Bytes>, DatagramError> {
        self.sweep_expired();

        let Some(raw) = channel.poll() else {
            return Ok(None);
        };
        let mut buf = raw.clone();
        let header = PacketHeader::decode(&mut buf)?;

        if !header.flags.is_frag() {
            return Ok(Some(buf));
        }

        let frag = header
            .fragment
            .ok_or(DatagramError::Fragmentation)?;
        let key = (header.channel_id, frag.frag_id);
        let entry = self
            .reassemblies
            .entry(key)
            .or_insert_with(Reassembly::new);
        entry.expires_at = Instant::now() + FRAGMENT_TIMEOUT;
        entry.fragments.insert(frag.frag_offset, buf);

        let grown = entry.take_new_prefix();
        Ok(grown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LoopbackChannel;

    #[test]
    fn small_payload_sends_single_frame() {
        let ch = LoopbackChannel::new();
        let mut engine = DatagramEngine::new(248);
        engine.send(&ch, 0, b"hello");
        let frame = ch.poll().unwrap();
        let mut buf = frame.clone();
        let header = PacketHeader::decode(&mut buf).unwrap();
        assert!(!header.flags.is_frag());
        assert_eq!(header.payload_length, 5);
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn empty_payload_is_noop() {
        let ch = LoopbackChannel::new();
        let mut engine = DatagramEngine::new(248);
        engine.send(&ch, 0, b"");
        assert!(ch.poll().is_none());
    }

    #[test]
    fn large_payload_fragments_and_reassembles() {
        let ch = LoopbackChannel::new();
        let mut sender = DatagramEngine::new(100);
        let payload = vec![b'A'; 300];
        sender.send(&ch, 0, &payload);

        let mut receiver = DatagramEngine::new(100);
        let mut reassembled = Vec::new();
        while let Some(chunk) = receiver.recv(&ch).unwrap() {
            reassembled.extend_from_slice(&chunk);
        }
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn repeated_recv_does_not_return_duplicate_bytes() {
        let ch = LoopbackChannel::new();
        let mut sender = DatagramEngine::new(100);
        sender.send(&ch, 0, &vec![b'B'; 250]);

        let mut receiver = DatagramEngine::new(100);
        let mut total = Vec::new();
        let mut calls = 0;
        while let Some(chunk) = receiver.recv(&ch).unwrap() {
            total.extend_from_slice(&chunk);
            calls += 1;
        }
        assert_eq!(total.len(), 250);
        // Three fragments in, three productive recv calls, no duplication.
        assert_eq!(calls, 3);
    }

    #[test]
    fn reordered_fragments_still_reassemble() {
        let mtu = 50;
        let max_payload = mtu - 6;
        let payload = vec![b'C'; max_payload * 3];
        let frag_id = 0xaabb_ccddu32;
        let ch = LoopbackChannel::new();

        // Emit fragments out of order: offset max_payload*2, then 0, then max_payload.
        for &i in &[2usize, 0, 1] {
            let offset = i * max_payload;
            let slice = &payload[offset..offset + max_payload];
            let header = PacketHeader::new_fragment(
                Flags::default(),
                0,
                0,
                slice.len() as u16,
                frag_id,
                offset as u16,
            );
            let mut frame = header.encode().unwrap().to_vec();
            frame.extend_from_slice(slice);
            ch.emit(Bytes::from(frame));
        }

        let mut receiver = DatagramEngine::new(mtu);
        let mut total = Vec::new();
        while let Some(chunk) = receiver.recv(&ch).unwrap() {
            total.extend_from_slice(&chunk);
        }
        assert_eq!(total, payload);
    }
}
