//! # Channel contract
//!
//! A channel is a half-duplex carrier over one carrier field: `emit` writes
//! a frame (subject to the carrier's own rate limit), `poll` returns at most
//! one newly observed frame. Channels are neither ordered nor lossless;
//! duplicates may be observed. Real carrier plugins (rename fields, SSID,
//! calendar titles) are out of scope here — only the contract they must
//! satisfy is specified, plus an in-memory loopback used by tests and the
//! demo binary.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;

/// A carrier a transport engine can emit frames onto and poll frames from.
///
/// Implementations must not block longer than a small bounded interval and
/// must tolerate `emit` being called faster than the carrier's physical
/// write rate by coalescing or dropping intermediate writes internally.
pub trait Channel: Send + Sync {
    /// Maximum size in bytes of a single carrier write.
    fn max_bytes(&self) -> usize;

    /// Write one frame onto the carrier.
    fn emit(&self, frame: Bytes);

    /// Return at most one newly observed frame, or `None` if nothing new
    /// has arrived since the last call.
    fn poll(&self) -> Option<Bytes>;
}

/// Deterministic impairment applied by [`LoopbackChannel`], for exercising
/// the properties that must hold over a lossy or duplicating carrier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Impairment {
    /// Duplicate every emitted frame this many extra times.
    pub duplicate: usize,
    /// Drop every Nth frame (0 disables dropping).
    pub drop_every: usize,
}

struct LoopbackState {
    queue: VecDeque<Bytes>,
    emitted: usize,
}

/// An in-memory loopback channel: `emit` pushes into a shared queue, `poll`
/// pops from it. Used by tests and the demo binary; not a carrier plugin.
pub struct LoopbackChannel {
    state: Mutex<LoopbackState>,
    impairment: Impairment,
}

impl LoopbackChannel {
    pub const MAX_BYTES: usize = 248;

    pub fn new() -> Self {
        Self::with_impairment(Impairment::default())
    }

    pub fn with_impairment(impairment: Impairment) -> Self {
        LoopbackChannel {
            state: Mutex::new(LoopbackState {
                queue: VecDeque::new(),
                emitted: 0,
            }),
            impairment,
        }
    }
}

impl Default for LoopbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for LoopbackChannel {
    fn max_bytes(&self) -> usize {
        Self::MAX_BYTES
    }

    fn emit(&self, frame: Bytes) {
        let mut state = self.state.lock().expect("loopback mutex poisoned");
        state.emitted += 1;
        if self.impairment.drop_every != 0 && state.emitted % self.impairment.drop_every == 0 {
            return;
        }
        state.queue.push_back(frame.clone());
        for _ in 0..self.impairment.duplicate {
            state.queue.push_back(frame.clone());
        }
    }

    fn poll(&self) -> Option<Bytes> {
        self.state
            .lock()
            .expect("loopback mutex poisoned")
            .queue
            .pop_front()
    }
}
