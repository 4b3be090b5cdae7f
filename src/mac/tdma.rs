//! Time-slotted MAC
//
// Time is divided into frames of `slots_per_frame` slots; each node owns
// the slot selected by its address and transmits at most one buffered
// packet per slot. No carrier sense and no acknowledgements.

use log::{debug, warn};

use rand_core::RngCore;

use crate::address::Address;
use crate::error::{MacError, TxFailure};
use crate::header::{HeaderError, HeaderInfo};
use crate::radio::Radio;
use crate::timer::{Jiffies, Timer, expired};

use super::queue::Outbound;
use super::{Core, Delivery, Mac, MacConfig, MacEvent};

#[derive(Debug, Default, PartialEq)]
pub struct TdmaMode {
    pending: Option<Outbound>,
}

pub type TdmaMac<R, T, G> = Core<R, T, G, TdmaMode>;

impl <R, T, G> Core<R, T, G, TdmaMode>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    /// Create a new TDMA MAC using the provided radio
    pub fn new_tdma(radio: R, timer: T, rng: G, config: MacConfig) -> Self {
        Core::with_mode(radio, timer, rng, config, TdmaMode::default())
    }

    /// Whether `now` falls inside this node's slot.
    ///
    /// Slots are counted from tick zero, so unless the frame length divides
    /// 2^32 the frame around the counter wrap is cut short.
    pub fn in_own_slot(&self, now: Jiffies) -> bool {
        let pos = now % self.config.frame_time_ms();

        pos / self.config.slot_len_ms() == self.config.own_slot() as u32
    }

    /// Start of the first own slot at or after `t`
    pub fn next_slot_start(&self, t: Jiffies) -> Jiffies {
        if self.in_own_slot(t) {
            return t;
        }

        let frame_time = self.config.frame_time_ms();
        let offset = (self.config.own_slot() as u32).saturating_mul(self.config.slot_len_ms());

        let pos = t % frame_time;
        let wait = match offset > pos {
            true => offset - pos,
            false => (frame_time - pos).saturating_add(offset),
        };

        t.wrapping_add(wait)
    }
}

impl <R, T, G> Mac for Core<R, T, G, TdmaMode>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    type Error = MacError<R::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        debug!("TDMA slot {} of {}", self.config.own_slot(), self.config.slots_per_frame);
        self.start()
    }

    fn send(&mut self, dst: Address, data: &[u8]) -> Result<u8, Self::Error> {
        let info = self.local_info(dst, false);
        self.send_ex(&info, data)
    }

    fn send_ex(&mut self, info: &HeaderInfo, data: &[u8]) -> Result<u8, Self::Error> {
        if self.mode.pending.is_some() {
            warn!("TX buffer full");
            return Err(MacError::QueueFull);
        }

        let (info, data) = self.admit(info, data)?;
        let seq = info.seq;

        self.mode.pending = Some(Outbound::new(info, data));

        Ok(seq)
    }

    fn receive<'a>(&mut self, frame: &'a [u8]) -> Result<Option<Delivery<'a>>, Self::Error> {
        let (info, payload) = match self.filter(frame) {
            Some(v) => v,
            None => return Ok(None),
        };

        if info.is_ack() {
            return Ok(None);
        }

        Ok(Some(Delivery{ info, payload }))
    }

    fn poll(&mut self) -> Result<Option<MacEvent>, Self::Error> {
        let now = self.now();

        let ready = match &self.mode.pending {
            Some(p) => expired(p.info.send_at, now) && self.in_own_slot(now),
            None => false,
        };

        if let Some(p) = ready.then(|| self.mode.pending.take()).flatten() {
            let (seq, dst) = (p.info.seq, p.info.next_hop());
            let event = match self.transmit_now(&p.info, &p.data) {
                Ok(_) => MacEvent::Sent{ seq, dst },
                Err(e) => {
                    warn!("Transmit of seq {} failed: {:?}", seq, e);
                    MacEvent::SendFailed{ seq, dst, reason: TxFailure::Radio }
                },
            };
            self.emit(event);
        }

        Ok(self.take_event())
    }

    fn cancel(&mut self, seq: u8) -> bool {
        if !matches!(&self.mode.pending, Some(p) if p.info.seq == seq) {
            return false;
        }

        debug!("Cancelled seq {}", seq);
        self.mode.pending = None;

        true
    }

    fn is_known_dst(&self, _dst: &Address) -> bool {
        true
    }

    fn build_header(&self, info: &HeaderInfo, buf: &mut [u8]) -> Result<usize, HeaderError> {
        info.encode(buf)
    }

    fn next_deadline(&self) -> Option<Jiffies> {
        let p = self.mode.pending.as_ref()?;
        let now = self.now();

        let earliest = match expired(p.info.send_at, now) {
            true => now,
            false => p.info.send_at,
        };

        Some(self.next_slot_start(earliest))
    }

    fn busy(&self) -> bool {
        self.mode.pending.is_some()
    }
}
