//! # microtransport
//!
//! A transport protocol for carrying byte payloads over extremely
//! low-bandwidth, high-latency carrier fields — device-rename strings,
//! wireless SSID fields, calendar titles, or any other metadata channel
//! whose MTU is a few dozen bytes and whose write rate is throttled to
//! seconds rather than milliseconds.
//!
//! Two transport modes share one wire format:
//!
//! - [`datagram`] — connectionless, best-effort, with fragmentation and
//!   greedy-prefix reassembly.
//! - [`reliable`] — connection-oriented, stop-and-wait ACK, exponential
//!   backoff retransmission, FIN/ACK teardown.
//!
//! ## Crate structure
//!
//! - [`wire`] — packet header encoding/decoding
//! - [`channel`] — the carrier abstraction engines are driven over
//! - [`datagram`] — best-effort fragmentation and reassembly engine
//! - [`reliable`] — connection state machine and retransmission scheduler
//! - [`carrier`] — optional authenticated carrier-frame codec
//! - [`config`] — tunable protocol parameters
//! - [`error`] — error types for every fallible surface

pub mod carrier;
pub mod channel;
#[cfg(feature = "config")]
pub mod config;
pub mod datagram;
pub mod error;
pub mod reliable;
pub mod wire;
