
use log::{trace, debug, warn, error};

use heapless::spsc::Queue;
use rand_core::RngCore;

use crate::{FrameBuf, MAX_FRAME_LEN};
use crate::address::Address;
use crate::error::MacError;
use crate::header::{HeaderInfo, InfoFlags, MAX_HEADER_LEN};
use crate::radio::Radio;
use crate::timer::{Jiffies, Timer};

use super::config::MacConfig;
use super::MacEvent;

/// Completion events buffered between polls (one slot is reserved)
pub const EVENT_QUEUE_LEN: usize = 8;

/// Shared MAC core.
/// Generic over a Radio (R), Timer (T), random source (G) and protocol Mode (M)
pub struct Core<R, T, G, M> {
    pub(crate) config: MacConfig,
    pub(crate) seq: u8,

    pub(crate) radio: R,
    pub(crate) timer: T,
    pub(crate) rng: G,
    pub(crate) mode: M,

    pub(crate) events: Queue<MacEvent, EVENT_QUEUE_LEN>,
}

impl <R, T, G, M> Core<R, T, G, M>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    pub(crate) fn with_mode(radio: R, timer: T, rng: G, config: MacConfig, mode: M) -> Self {
        Self {
            config,
            seq: 0,
            radio,
            timer,
            rng,
            mode,
            events: Queue::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.config.address
    }

    pub fn config(&self) -> &MacConfig {
        &self.config
    }

    pub fn radio(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn now(&self) -> Jiffies {
        self.timer.jiffies()
    }

    /// Power up the radio in receive mode
    pub fn start(&mut self) -> Result<(), MacError<R::Error>> {
        debug!("Starting MAC with address {:?}", self.config.address);
        self.radio.on().map_err(MacError::Radio)
    }

    /// Next non-zero sequence number
    pub(crate) fn next_seq(&mut self) -> u8 {
        self.seq = match self.seq.wrapping_add(1) {
            0 => 1,
            s => s,
        };
        self.seq
    }

    /// Descriptor for a locally originated packet to `dst`
    pub(crate) fn local_info(&self, dst: Address, request_ack: bool) -> HeaderInfo {
        let mut info = HeaderInfo::new(dst);
        info.original_src = self.config.address;
        info.flags.insert(InfoFlags::LOCAL);

        if request_ack && self.config.ack_unicast && !dst.is_broadcast() {
            info.flags.insert(InfoFlags::ACK_REQUESTED);
        }

        info
    }

    /// Largest frame the MAC will hand to the radio
    pub(crate) fn frame_limit(&self) -> usize {
        self.config.buffer_size.min(MAX_FRAME_LEN)
    }

    /// Validate a packet for sending and copy out its payload,
    /// assigning a sequence number where none is set
    pub(crate) fn admit(&mut self, info: &HeaderInfo, data: &[u8]) -> Result<(HeaderInfo, FrameBuf), MacError<R::Error>> {
        let mut info = info.clone();

        if !self.config.long_addresses {
            let addrs = [info.original_src, info.original_dst, info.immed_src, info.immed_dst];
            if addrs.iter().any(|a| a.is_long()) {
                warn!("Long address used with long addresses disabled");
                return Err(MacError::InvalidAddress);
            }
        }

        if info.seq == 0 {
            info.seq = self.next_seq();
        }

        let header_len = info.encoded_len()?;
        if header_len + data.len() > self.frame_limit() {
            warn!("Packet of {} bytes exceeds frame limit {}", header_len + data.len(), self.frame_limit());
            return Err(MacError::PayloadTooLong);
        }

        let data = FrameBuf::from_slice(data).map_err(|_| MacError::PayloadTooLong)?;

        info.header_len = header_len;

        Ok((info, data))
    }

    /// Transmit a packet immediately (bypassing CSMA)
    pub(crate) fn transmit_now(&mut self, info: &HeaderInfo, data: &[u8]) -> Result<usize, MacError<R::Error>> {
        let mut header = [0u8; MAX_HEADER_LEN];
        let n = info.encode(&mut header)?;

        debug!("Transmitting seq {} to {:?} ({} + {} bytes)", info.seq, info.next_hop(), n, data.len());
        trace!("Header: {:?}", &header[..n]);

        self.radio.send(&header[..n], data).map_err(MacError::Radio)?;

        Ok(n)
    }

    pub(crate) fn channel_clear(&mut self) -> Result<bool, MacError<R::Error>> {
        let clear = self.radio.is_channel_clear().map_err(MacError::Radio)?;
        if !clear {
            debug!("Channel busy");
        }
        Ok(clear)
    }

    /// Random backoff in `[0, max_ms]`
    pub(crate) fn backoff_ms(&mut self, max_ms: u32) -> u32 {
        match max_ms {
            0 => 0,
            m => self.rng.next_u32() % (m + 1),
        }
    }

    /// Decode a received frame, dropping it when malformed
    pub(crate) fn parse<'a>(&self, frame: &'a [u8]) -> Option<(HeaderInfo, &'a [u8])> {
        match HeaderInfo::decode(frame) {
            Ok((info, n)) => Some((info, &frame[n..])),
            Err(e) => {
                warn!("Dropping malformed frame ({} bytes): {:?}", frame.len(), e);
                None
            }
        }
    }

    /// Decode a received frame, keeping it only when addressed to this node
    pub(crate) fn filter<'a>(&self, frame: &'a [u8]) -> Option<(HeaderInfo, &'a [u8])> {
        let (info, payload) = self.parse(frame)?;

        if !self.check_address_match(&info.next_hop()) {
            return None;
        }

        trace!("Received seq {} from {:?} ({} bytes)", info.seq, info.prev_hop(), payload.len());

        Some((info, payload))
    }

    /// Check whether an incoming next hop address matches
    pub(crate) fn check_address_match(&self, a: &Address) -> bool {
        if *a == self.config.address || a.is_broadcast() {
            return true;
        }

        debug!("Address mismatch ({:?})", a);
        false
    }

    /// Acknowledgement descriptor for a received packet, the single hop it
    /// arrived on turned around
    pub(crate) fn ack_for(&self, info: &HeaderInfo) -> HeaderInfo {
        let mut ack = HeaderInfo {
            original_src: info.prev_hop(),
            original_dst: self.config.address,
            seq: info.seq,
            flags: InfoFlags::IS_ACK,
            ..Default::default()
        };
        ack.invert_direction();
        ack
    }

    pub(crate) fn send_ack(&mut self, info: &HeaderInfo) -> Result<(), MacError<R::Error>> {
        let ack = self.ack_for(info);

        debug!("Sending ACK for seq {} to {:?}", ack.seq, ack.original_dst);

        self.transmit_now(&ack, &[])?;

        Ok(())
    }

    pub(crate) fn emit(&mut self, event: MacEvent) {
        if let Err(e) = self.events.enqueue(event) {
            error!("MAC event queue full, dropping {:?}", e);
        }
    }

    pub(crate) fn take_event(&mut self) -> Option<MacEvent> {
        self.events.dequeue()
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::mock::StepRng;

    use crate::header::HeaderError;
    use crate::radio::mock::MockRadio;
    use crate::timer::mock::MockTimer;
    use super::*;

    type TestCore = Core<MockRadio, MockTimer, StepRng, ()>;

    fn core(config: MacConfig) -> (TestCore, MockRadio) {
        let radio = MockRadio::new();
        let c = Core::with_mode(radio.clone(), MockTimer::new(), StepRng::new(0, 1), config, ());
        (c, radio)
    }

    #[test]
    fn sequence_skips_zero() {
        let (mut c, _radio) = core(MacConfig::new(Address::from(1)));

        c.seq = 254;
        assert_eq!(c.next_seq(), 255);
        assert_eq!(c.next_seq(), 1);
    }

    #[test]
    fn transmit_now_encodes_header() {
        let (mut c, radio) = core(MacConfig::new(Address::from(1)));

        let info = c.local_info(Address::from(2), false);
        let (info, data) = c.admit(&info, &[0xaa, 0xbb]).unwrap();

        let n = c.transmit_now(&info, &data).unwrap();

        let sent = radio.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), n + 2);

        let (decoded, m) = HeaderInfo::decode(&sent[0]).unwrap();
        assert_eq!(m, n);
        assert_eq!(decoded.original_src, Address::from(1));
        assert_eq!(decoded.original_dst, Address::from(2));
        assert_eq!(decoded.seq, 1);
        assert_eq!(&sent[0][n..], &[0xaa, 0xbb]);
    }

    #[test]
    fn local_info_requests_ack_for_unicast() {
        let (c, _radio) = core(MacConfig::new(Address::from(1)));

        assert!(c.local_info(Address::from(2), true).ack_requested());
        assert!(!c.local_info(Address::BROADCAST, true).ack_requested());
        assert!(!c.local_info(Address::from(2), false).ack_requested());
        assert!(c.local_info(Address::from(2), true).is_local());
    }

    #[test]
    fn admit_checks_length_and_addresses() {
        let mut config = MacConfig::new(Address::from(1));
        config.buffer_size = 16;
        config.long_addresses = false;
        let (mut c, _radio) = core(config);

        let mut info = c.local_info(Address::from(2), false);
        info.seq = 9;
        assert_eq!(c.admit(&info, &[0u8; 32]), Err(MacError::PayloadTooLong));

        // Header and payload both count towards the limit
        let header_len = info.encoded_len().unwrap();
        assert!(c.admit(&info, &[0u8; 16][header_len..]).is_ok());
        assert_eq!(c.admit(&info, &[0u8; 16][header_len - 1..]), Err(MacError::PayloadTooLong));

        let info = c.local_info(Address::from([1, 2, 3, 4, 5, 6, 7, 8]), false);
        assert_eq!(c.admit(&info, &[0u8; 2]), Err(MacError::InvalidAddress));

        let mut info = c.local_info(Address::from(2), false);
        info.immed_src = Address::from([1; 8]);
        c.config.long_addresses = true;
        assert_eq!(c.admit(&info, &[]), Err(MacError::Header(HeaderError::LongImmediateAddress)));
    }

    #[test]
    fn frame_limit_capped_by_radio_frame() {
        let mut config = MacConfig::new(Address::from(1));
        config.buffer_size = 200;
        let (mut c, _radio) = core(config);

        assert_eq!(c.frame_limit(), MAX_FRAME_LEN);

        let mut info = c.local_info(Address::from(2), false);
        info.seq = 9;
        let header_len = info.encoded_len().unwrap();
        let data = [0u8; MAX_FRAME_LEN];

        assert!(c.admit(&info, &data[header_len..]).is_ok());
        assert_eq!(c.admit(&info, &data[header_len - 1..]), Err(MacError::PayloadTooLong));
    }

    #[test]
    fn admit_keeps_existing_seq() {
        let (mut c, _radio) = core(MacConfig::new(Address::from(1)));

        let mut info = c.local_info(Address::from(2), false);
        info.seq = 42;

        let (info, _data) = c.admit(&info, &[1]).unwrap();
        assert_eq!(info.seq, 42);
        assert_eq!(c.seq, 0);
    }

    #[test]
    fn address_match() {
        let (c, _radio) = core(MacConfig::new(Address::from(1)));

        assert!(c.check_address_match(&Address::from(1)));
        assert!(c.check_address_match(&Address::BROADCAST));
        assert!(!c.check_address_match(&Address::from(2)));
    }

    #[test]
    fn ack_addressed_to_previous_hop() {
        let (c, _radio) = core(MacConfig::new(Address::from(1)));

        let mut info = HeaderInfo::new(Address::from(9));
        info.original_src = Address::from(7);
        info.immed_src = Address::from(3);
        info.immed_dst = Address::from(1);
        info.seq = 12;

        let ack = c.ack_for(&info);
        assert!(ack.is_ack());
        assert_eq!(ack.seq, 12);
        assert_eq!(ack.next_hop(), Address::from(3));
        assert_eq!(ack.prev_hop(), Address::from(1));

        // Single hop frame, no immediate addresses or ports carried
        assert_eq!(ack.original_src, Address::from(1));
        assert_eq!(ack.original_dst, Address::from(3));
        assert!(ack.immed_src.is_unspecified());
        assert!(ack.immed_dst.is_unspecified());
    }

    #[test]
    fn backoff_bounds() {
        let (mut c, _radio) = core(MacConfig::new(Address::from(1)));
        c.rng = StepRng::new(37, 0);

        assert_eq!(c.backoff_ms(0), 0);
        assert_eq!(c.backoff_ms(30), 37 % 31);
    }

    #[test]
    fn channel_clear_from_radio() {
        let (mut c, mut radio) = core(MacConfig::new(Address::from(1)));

        radio.push_cca(&[false, true]);
        assert_eq!(c.channel_clear(), Ok(false));
        assert_eq!(c.channel_clear(), Ok(true));
    }

    #[test]
    fn malformed_frames_dropped() {
        let (c, _radio) = core(MacConfig::new(Address::from(1)));

        // Short source flagged but missing
        assert!(c.parse(&[0x01]).is_none());
        assert!(c.parse(&[]).is_none());
    }
}
