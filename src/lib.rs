//! Wireless sensor node MAC stack
//
// Single-hop MAC protocols (pass-through, CSMA, CSMA with acknowledgements,
// TDMA-like), a bit-packed header codec, the alarm scheduler that drives
// protocol timing and the forwarder between the MAC and upper layers.

#![no_std]

#[cfg(any(test, feature="std"))]
extern crate std;

pub mod timer;

pub mod critical;

pub mod alarm;

pub mod address;

pub mod header;

pub mod error;

pub mod radio;

pub mod mac;

pub mod net;

pub mod node;

pub mod prelude;

/// Maximum radio frame length (header and payload)
pub const MAX_FRAME_LEN: usize = 128;

/// Statically sized frame buffer
pub type FrameBuf = heapless::Vec<u8, MAX_FRAME_LEN>;
