
use log::{debug, warn};

use rand_core::RngCore;

use crate::address::Address;
use crate::error::{MacError, TxFailure};
use crate::header::{HeaderError, HeaderInfo};
use crate::radio::Radio;
use crate::timer::{Jiffies, Timer, expired};

use super::queue::{Outbound, OutboundQueue, Slot};
use super::{Core, Delivery, Mac, MacConfig, MacEvent};

/// Carrier sense state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CsmaState {
    Idle,
    /// Waiting out a backoff before the next channel assessment
    Backoff {
        until: Jiffies,
        busy: u8,
    },
}

/// Result of a channel access attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Access {
    Pending {
        until: Jiffies,
        busy: u8,
    },
    Clear,
}

pub struct CsmaMode<const Q: usize> {
    pub(crate) queue: OutboundQueue<Q>,
    pub(crate) state: CsmaState,
}

pub type CsmaMac<R, T, G, const Q: usize> = Core<R, T, G, CsmaMode<Q>>;

impl <R, T, G, M> Core<R, T, G, M>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    /// Backoff expiry for a freshly started packet
    pub(crate) fn initial_backoff(&mut self, now: Jiffies) -> Jiffies {
        let backoff = self.backoff_ms(self.config.max_initial_backoff_ms);

        debug!("Starting CSMA backoff at {} with expiry {}", now, now.wrapping_add(backoff));

        now.wrapping_add(backoff)
    }

    /// Assess the channel once the backoff expires, backing off again while
    /// busy until the assessment budget is spent.
    pub(crate) fn channel_access(&mut self, until: Jiffies, busy: u8, now: Jiffies) -> Result<Access, MacError<R::Error>> {
        if !expired(until, now) {
            return Ok(Access::Pending{ until, busy });
        }

        if self.channel_clear()? {
            return Ok(Access::Clear);
        }

        if busy >= self.config.max_cca_retries {
            warn!("Channel busy after {} assessments, transmitting anyway", busy as u16 + 1);
            return Ok(Access::Clear);
        }

        let backoff = self.backoff_ms(self.config.max_initial_backoff_ms).max(1);
        debug!("Backoff error at {} ms, retrying in {} ms", now, backoff);

        Ok(Access::Pending{ until: now.wrapping_add(backoff), busy: busy + 1 })
    }

    /// Admit and queue a packet, returning its sequence number
    pub(crate) fn enqueue<const Q: usize>(&mut self, info: &HeaderInfo, data: &[u8], queue: impl FnOnce(&mut M) -> &mut OutboundQueue<Q>) -> Result<u8, MacError<R::Error>> {
        let (info, data) = self.admit(info, data)?;
        let seq = info.seq;

        queue(&mut self.mode).enqueue(Outbound::new(info, data))
            .map_err(|p| {
                warn!("TX queue full, dropping seq {}", p.info.seq);
                MacError::QueueFull
            })?;

        Ok(seq)
    }
}

impl <R, T, G, const Q: usize> Core<R, T, G, CsmaMode<Q>>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    /// Create a new CSMA MAC using the provided radio
    pub fn new_csma(radio: R, timer: T, rng: G, config: MacConfig) -> Self {
        let mode = CsmaMode {
            queue: OutboundQueue::new(),
            state: CsmaState::Idle,
        };
        Core::with_mode(radio, timer, rng, config, mode)
    }

    pub fn state(&self) -> CsmaState {
        self.mode.state
    }

    /// Advance the carrier sense state machine, returning true while
    /// further progress is possible at `now`
    fn step(&mut self, now: Jiffies) -> Result<bool, MacError<R::Error>> {
        match self.mode.state {
            CsmaState::Idle => {
                if self.mode.queue.start_next(now).is_none() {
                    return Ok(false);
                }

                let until = self.initial_backoff(now);
                self.mode.state = CsmaState::Backoff{ until, busy: 0 };
            },
            CsmaState::Backoff{ until, busy } => {
                if let Access::Pending{ until, busy } = self.channel_access(until, busy, now)? {
                    self.mode.state = CsmaState::Backoff{ until, busy };
                    return Ok(false);
                }

                self.mode.state = CsmaState::Idle;

                let p = match self.mode.queue.complete() {
                    Some(p) => p,
                    None => return Ok(true),
                };

                let (seq, dst) = (p.info.seq, p.info.next_hop());
                let event = match self.transmit_now(&p.info, &p.data) {
                    Ok(_) => MacEvent::Sent{ seq, dst },
                    Err(e) => {
                        warn!("Transmit of seq {} failed: {:?}", seq, e);
                        MacEvent::SendFailed{ seq, dst, reason: TxFailure::Radio }
                    },
                };
                self.emit(event);
            },
        }

        Ok(true)
    }
}

impl <R, T, G, const Q: usize> Mac for Core<R, T, G, CsmaMode<Q>>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    type Error = MacError<R::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        self.start()
    }

    fn send(&mut self, dst: Address, data: &[u8]) -> Result<u8, Self::Error> {
        let info = self.local_info(dst, false);
        self.send_ex(&info, data)
    }

    fn send_ex(&mut self, info: &HeaderInfo, data: &[u8]) -> Result<u8, Self::Error> {
        self.enqueue(info, data, |m| &mut m.queue)
    }

    fn receive<'a>(&mut self, frame: &'a [u8]) -> Result<Option<Delivery<'a>>, Self::Error> {
        let (info, payload) = match self.filter(frame) {
            Some(v) => v,
            None => return Ok(None),
        };

        if info.is_ack() {
            debug!("Ignoring ACK for seq {}", info.seq);
            return Ok(None);
        }

        Ok(Some(Delivery{ info, payload }))
    }

    fn poll(&mut self) -> Result<Option<MacEvent>, Self::Error> {
        let now = self.now();

        while self.step(now)? {}

        Ok(self.take_event())
    }

    fn cancel(&mut self, seq: u8) -> bool {
        match self.mode.queue.remove(seq) {
            Some(Slot::InFlight(_)) => {
                debug!("Cancelled in flight seq {}", seq);
                self.mode.state = CsmaState::Idle;
                true
            },
            Some(_) => {
                debug!("Cancelled queued seq {}", seq);
                true
            },
            None => false,
        }
    }

    fn is_known_dst(&self, _dst: &Address) -> bool {
        true
    }

    fn build_header(&self, info: &HeaderInfo, buf: &mut [u8]) -> Result<usize, HeaderError> {
        info.encode(buf)
    }

    fn next_deadline(&self) -> Option<Jiffies> {
        match self.mode.state {
            CsmaState::Backoff{ until, .. } => Some(until),
            CsmaState::Idle => self.mode.queue.next_send_at(self.now()),
        }
    }

    fn busy(&self) -> bool {
        !self.mode.queue.is_empty()
    }
}
