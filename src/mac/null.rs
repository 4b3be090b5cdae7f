//! Pass-through MAC
//
// No header, no addressing and no medium access: frames go straight to the
// radio and every received frame is delivered as a broadcast.

use log::{debug, warn};

use rand_core::RngCore;

use crate::address::Address;
use crate::error::MacError;
use crate::header::{HeaderError, HeaderInfo};
use crate::radio::Radio;
use crate::timer::{Jiffies, Timer};

use super::{Core, Delivery, Mac, MacConfig, MacEvent};

#[derive(Debug, Default, PartialEq)]
pub struct NullMode;

pub type NullMac<R, T, G> = Core<R, T, G, NullMode>;

impl <R, T, G> Core<R, T, G, NullMode>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    /// Create a new pass-through MAC using the provided radio
    pub fn new_null(radio: R, timer: T, rng: G, config: MacConfig) -> Self {
        Core::with_mode(radio, timer, rng, config, NullMode)
    }
}

impl <R, T, G> Mac for Core<R, T, G, NullMode>
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
        if data.len() > self.frame_limit() {
            warn!("Payload of {} bytes exceeds frame limit {}", data.len(), self.frame_limit());
            return Err(MacError::PayloadTooLong);
        }

        let seq = self.next_seq();

        debug!("Pass-through send of {} bytes", data.len());
        self.radio.send(&[], data).map_err(MacError::Radio)?;

        self.emit(MacEvent::Sent{ seq, dst: info.next_hop() });

        Ok(seq)
    }

    fn receive<'a>(&mut self, frame: &'a [u8]) -> Result<Option<Delivery<'a>>, Self::Error> {
        Ok(Some(Delivery {
            info: HeaderInfo::default(),
            payload: frame,
        }))
    }

    fn poll(&mut self) -> Result<Option<MacEvent>, Self::Error> {
        Ok(self.take_event())
    }

    fn cancel(&mut self, _seq: u8) -> bool {
        false
    }

    fn is_known_dst(&self, _dst: &Address) -> bool {
        true
    }

    fn build_header(&self, _info: &HeaderInfo, _buf: &mut [u8]) -> Result<usize, HeaderError> {
        Ok(0)
    }

    fn next_deadline(&self) -> Option<Jiffies> {
        None
    }

    fn busy(&self) -> bool {
        false
    }
}
