//! Medium Access Control (MAC) layer module.
//! Contains the MAC trait, the protocol variants and runtime selection
//! between them.

use rand_core::RngCore;

use crate::address::Address;
use crate::error::{MacError, TxFailure};
use crate::header::{HeaderError, HeaderInfo};
use crate::radio::Radio;
use crate::timer::{Jiffies, Timer};

pub mod config;
pub use config::MacConfig;

pub mod core;
pub use self::core::Core;

pub mod queue;

pub mod null;
pub use null::{NullMac, NullMode};

pub mod csma;
pub use csma::{CsmaMac, CsmaMode};

pub mod csma_ack;
pub use csma_ack::{CsmaAckMac, CsmaAckMode};

pub mod tdma;
pub use tdma::{TdmaMac, TdmaMode};

/// Packet delivered upwards by the MAC
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery<'a> {
    pub info: HeaderInfo,
    pub payload: &'a [u8],
}

/// Outcome of a send accepted by the MAC
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacEvent {
    Sent {
        seq: u8,
        dst: Address,
    },
    SendFailed {
        seq: u8,
        dst: Address,
        reason: TxFailure,
    },
}

/// Generic MAC trait, implemented by all MACs
pub trait Mac {
    type Error;

    /// Power up the radio and start listening
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Queue `data` for transmission to `dst`, returns the sequence number
    fn send(&mut self, dst: Address, data: &[u8]) -> Result<u8, Self::Error>;

    /// Queue `data` with an explicit header descriptor
    fn send_ex(&mut self, info: &HeaderInfo, data: &[u8]) -> Result<u8, Self::Error>;

    /// Handle a frame from the radio, returning the packet to deliver upwards
    fn receive<'a>(&mut self, frame: &'a [u8]) -> Result<Option<Delivery<'a>>, Self::Error>;

    /// Advance protocol timing, returning the next completed send if any
    fn poll(&mut self) -> Result<Option<MacEvent>, Self::Error>;

    /// Abandon the queued or in flight send `seq`, without reporting an
    /// outcome. Returns false when no such send is held.
    fn cancel(&mut self, seq: u8) -> bool;

    /// Whether upper layers can expect `dst` to be reachable
    fn is_known_dst(&self, dst: &Address) -> bool;

    /// Build the encoded header for `info`
    fn build_header(&self, info: &HeaderInfo, buf: &mut [u8]) -> Result<usize, HeaderError>;

    /// Next time `poll` has work to do
    fn next_deadline(&self) -> Option<Jiffies>;

    /// Whether a send is queued or in progress
    fn busy(&self) -> bool;
}

/// Available protocol variants
#[derive(Copy, Clone, Debug, PartialEq, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolKind {
    /// No addressing, frames pass straight through to the radio
    Null,
    /// Carrier sense before each transmission
    Csma,
    /// Carrier sense with software acknowledgements and retries
    CsmaAck,
    /// Transmission in a per-node time slot
    Tdma,
}

/// The active MAC protocol, selected at node start-up
pub enum Protocol<R, T, G, const Q: usize> {
    Null(NullMac<R, T, G>),
    Csma(CsmaMac<R, T, G, Q>),
    CsmaAck(CsmaAckMac<R, T, G, Q>),
    Tdma(TdmaMac<R, T, G>),
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $e:expr) => {
        match $self {
            Protocol::Null($m) => $e,
            Protocol::Csma($m) => $e,
            Protocol::CsmaAck($m) => $e,
            Protocol::Tdma($m) => $e,
        }
    };
}

impl <R, T, G, const Q: usize> Protocol<R, T, G, Q>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    pub fn new(kind: ProtocolKind, radio: R, timer: T, rng: G, config: MacConfig) -> Self {
        match kind {
            ProtocolKind::Null => Protocol::Null(Core::new_null(radio, timer, rng, config)),
            ProtocolKind::Csma => Protocol::Csma(Core::new_csma(radio, timer, rng, config)),
            ProtocolKind::CsmaAck => Protocol::CsmaAck(Core::new_csma_ack(radio, timer, rng, config)),
            ProtocolKind::Tdma => Protocol::Tdma(Core::new_tdma(radio, timer, rng, config)),
        }
    }

    pub fn kind(&self) -> ProtocolKind {
        match self {
            Protocol::Null(_) => ProtocolKind::Null,
            Protocol::Csma(_) => ProtocolKind::Csma,
            Protocol::CsmaAck(_) => ProtocolKind::CsmaAck,
            Protocol::Tdma(_) => ProtocolKind::Tdma,
        }
    }

    pub fn address(&self) -> Address {
        dispatch!(self, m => m.address())
    }

    pub fn radio(&mut self) -> &mut R {
        dispatch!(self, m => m.radio())
    }

    pub fn now(&self) -> Jiffies {
        dispatch!(self, m => m.now())
    }
}

impl <R, T, G, const Q: usize> Mac for Protocol<R, T, G, Q>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    type Error = MacError<R::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        dispatch!(self, m => m.init())
    }

    fn send(&mut self, dst: Address, data: &[u8]) -> Result<u8, Self::Error> {
        dispatch!(self, m => m.send(dst, data))
    }

    fn send_ex(&mut self, info: &HeaderInfo, data: &[u8]) -> Result<u8, Self::Error> {
        dispatch!(self, m => m.send_ex(info, data))
    }

    fn receive<'a>(&mut self, frame: &'a [u8]) -> Result<Option<Delivery<'a>>, Self::Error> {
        dispatch!(self, m => m.receive(frame))
    }

    fn poll(&mut self) -> Result<Option<MacEvent>, Self::Error> {
        dispatch!(self, m => m.poll())
    }

    fn cancel(&mut self, seq: u8) -> bool {
        dispatch!(self, m => m.cancel(seq))
    }

    fn is_known_dst(&self, dst: &Address) -> bool {
        dispatch!(self, m => m.is_known_dst(dst))
    }

    fn build_header(&self, info: &HeaderInfo, buf: &mut [u8]) -> Result<usize, HeaderError> {
        dispatch!(self, m => m.build_header(info, buf))
    }

    fn next_deadline(&self) -> Option<Jiffies> {
        dispatch!(self, m => m.next_deadline())
    }

    fn busy(&self) -> bool {
        dispatch!(self, m => m.busy())
    }
}
