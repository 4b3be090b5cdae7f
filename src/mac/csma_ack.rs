//! CSMA with software acknowledgements
//
// Unicast packets requesting an ACK stay in flight until a matching ACK
// (same sequence number, sent by the packet's next hop) is heard. Missing
// ACKs are retried with a linearly increasing backoff up to the configured
// number of attempts.

use log::{debug, info, warn};

use heapless::Vec;
use rand_core::RngCore;

use crate::address::Address;
use crate::error::{MacError, TxFailure};
use crate::header::{HeaderError, HeaderInfo};
use crate::radio::Radio;
use crate::timer::{Jiffies, Timer, expired};

use super::csma::Access;
use super::queue::{OutboundQueue, Slot};
use super::{Core, Delivery, Mac, MacConfig, MacEvent};

/// Number of neighbours remembered for destination checks
pub const NEIGHBOUR_TABLE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AckState {
    Idle,
    Backoff {
        until: Jiffies,
        busy: u8,
    },
    AwaitingAck {
        until: Jiffies,
    },
    RetryWait {
        until: Jiffies,
    },
}

pub struct CsmaAckMode<const Q: usize> {
    pub(crate) queue: OutboundQueue<Q>,
    pub(crate) state: AckState,
    pub(crate) neighbours: Vec<Address, NEIGHBOUR_TABLE_LEN>,
}

pub type CsmaAckMac<R, T, G, const Q: usize> = Core<R, T, G, CsmaAckMode<Q>>;

impl <R, T, G, const Q: usize> Core<R, T, G, CsmaAckMode<Q>>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    /// Create a new acknowledged CSMA MAC using the provided radio
    pub fn new_csma_ack(radio: R, timer: T, rng: G, config: MacConfig) -> Self {
        let mode = CsmaAckMode {
            queue: OutboundQueue::new(),
            state: AckState::Idle,
            neighbours: Vec::new(),
        };
        Core::with_mode(radio, timer, rng, config, mode)
    }

    pub fn state(&self) -> AckState {
        self.mode.state
    }

    pub fn neighbours(&self) -> &[Address] {
        &self.mode.neighbours
    }

    fn learn_neighbour(&mut self, addr: Address) {
        if addr.is_unspecified() || addr.is_broadcast() || self.mode.neighbours.contains(&addr) {
            return;
        }

        if self.mode.neighbours.len() == self.mode.neighbours.capacity() {
            self.mode.neighbours.swap_remove(0);
        }

        debug!("New neighbour {:?}", addr);
        let _ = self.mode.neighbours.push(addr);
    }

    /// Advance the send state machine, returning true while further
    /// progress is possible at `now`
    fn step(&mut self, now: Jiffies) -> Result<bool, MacError<R::Error>> {
        match self.mode.state {
            AckState::Idle => {
                if self.mode.queue.start_next(now).is_none() {
                    return Ok(false);
                }

                let until = self.initial_backoff(now);
                self.mode.state = AckState::Backoff{ until, busy: 0 };
            },
            AckState::Backoff{ until, busy } => {
                if let Access::Pending{ until, busy } = self.channel_access(until, busy, now)? {
                    self.mode.state = AckState::Backoff{ until, busy };
                    return Ok(false);
                }

                self.attempt(now);
            },
            AckState::AwaitingAck{ until } => {
                if !expired(until, now) {
                    return Ok(false);
                }

                debug!("ACK timeout at {} ms", now);
                self.attempt_failed(TxFailure::AckTimeout, now);
            },
            AckState::RetryWait{ until } => {
                if !expired(until, now) {
                    return Ok(false);
                }

                self.mode.state = AckState::Backoff{ until: now, busy: 0 };
            },
        }

        Ok(true)
    }

    /// Transmit the in flight packet
    fn attempt(&mut self, now: Jiffies) {
        let (info, data) = match self.mode.queue.in_flight() {
            Some((_i, p)) => {
                p.attempts += 1;
                (p.info.clone(), p.data.clone())
            },
            None => {
                self.mode.state = AckState::Idle;
                return;
            },
        };

        match self.transmit_now(&info, &data) {
            Err(e) => {
                warn!("Transmit of seq {} failed: {:?}", info.seq, e);
                self.attempt_failed(TxFailure::Radio, now);
            },
            Ok(_) if info.ack_requested() && !info.next_hop().is_broadcast() => {
                let until = now.wrapping_add(self.config.ack_timeout_ms);
                self.mode.state = AckState::AwaitingAck{ until };
            },
            Ok(_) => self.finish(None),
        }
    }

    /// Retry the in flight packet, or report it failed once out of attempts
    fn attempt_failed(&mut self, reason: TxFailure, now: Jiffies) {
        let attempts = match self.mode.queue.in_flight() {
            Some((_i, p)) => p.attempts,
            None => 0,
        };

        if attempts >= self.config.max_attempts {
            self.finish(Some(reason));
            return;
        }

        let backoff = self.config.retry_backoff_ms(attempts);
        debug!("Retrying in {} ms (attempt {} of {})", backoff, attempts + 1, self.config.max_attempts);

        self.mode.state = AckState::RetryWait{ until: now.wrapping_add(backoff) };
    }

    /// Release the in flight packet and report its outcome
    fn finish(&mut self, failure: Option<TxFailure>) {
        self.mode.state = AckState::Idle;

        let p = match self.mode.queue.complete() {
            Some(p) => p,
            None => return,
        };

        let (seq, dst) = (p.info.seq, p.info.next_hop());
        let event = match failure {
            None => MacEvent::Sent{ seq, dst },
            Some(reason) => {
                info!("Send of seq {} to {:?} failed after {} attempts: {:?}", seq, dst, p.attempts, reason);
                MacEvent::SendFailed{ seq, dst, reason }
            },
        };

        self.emit(event);
    }

    fn handle_ack(&mut self, ack: &HeaderInfo) {
        if let AckState::AwaitingAck{ .. } = self.mode.state {
            let matched = match self.mode.queue.in_flight() {
                Some((_i, p)) => p.info.seq == ack.seq && p.info.next_hop() == ack.prev_hop(),
                None => false,
            };

            if matched {
                debug!("Received ACK for seq {}", ack.seq);
                self.finish(None);
            } else {
                warn!("Received ACK mismatch (seq {} from {:?})", ack.seq, ack.prev_hop());
            }
        } else {
            debug!("Unexpected ACK for seq {}", ack.seq);
        }
    }
}

impl <R, T, G, const Q: usize> Mac for Core<R, T, G, CsmaAckMode<Q>>
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
        let info = self.local_info(dst, true);
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

        self.learn_neighbour(info.prev_hop());

        if info.is_ack() {
            self.handle_ack(&info);
            return Ok(None);
        }

        if info.ack_requested() && info.next_hop() == self.config.address {
            if let Err(e) = self.send_ack(&info) {
                warn!("Failed to send ACK for seq {}: {:?}", info.seq, e);
            }
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
                self.mode.state = AckState::Idle;
                true
            },
            Some(_) => {
                debug!("Cancelled queued seq {}", seq);
                true
            },
            None => false,
        }
    }

    fn is_known_dst(&self, dst: &Address) -> bool {
        dst.is_broadcast() || self.mode.neighbours.contains(dst)
    }

    fn build_header(&self, info: &HeaderInfo, buf: &mut [u8]) -> Result<usize, HeaderError> {
        info.encode(buf)
    }

    fn next_deadline(&self) -> Option<Jiffies> {
        match self.mode.state {
            AckState::Backoff{ until, .. } => Some(until),
            AckState::AwaitingAck{ until } => Some(until),
            AckState::RetryWait{ until } => Some(until),
            AckState::Idle => self.mode.queue.next_send_at(self.now()),
        }
    }

    fn busy(&self) -> bool {
        !self.mode.queue.is_empty()
    }
}

#[cfg(test)]
mod test {
    use std::vec;
    use std::vec::Vec;

    use rand::rngs::mock::StepRng;

    use crate::header::InfoFlags;
    use crate::radio::mock::MockRadio;
    use crate::timer::mock::MockTimer;
    use super::*;

    type TestMac = CsmaAckMac<MockRadio, MockTimer, StepRng, 2>;

    fn csma_ack() -> (TestMac, MockRadio, MockTimer) {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let radio = MockRadio::new();
        let timer = MockTimer::new();
        let mac = Core::new_csma_ack(radio.clone(), timer.clone(), StepRng::new(0, 0), MacConfig::new(Address::from(1)));

        (mac, radio, timer)
    }

    fn frame(info: &HeaderInfo, data: &[u8]) -> Vec<u8> {
        let mut buff = [0u8; 64];
        let n = info.encode(&mut buff).unwrap();
        let mut f = buff[..n].to_vec();
        f.extend_from_slice(data);
        f
    }

    fn ack(from: u16, to: u16, seq: u8) -> Vec<u8> {
        let info = HeaderInfo {
            original_src: Address::from(from),
            original_dst: Address::from(to),
            seq,
            flags: InfoFlags::IS_ACK,
            ..Default::default()
        };
        frame(&info, &[])
    }

    /// Run a send to node 2, acknowledging transmission `ack_on` if set.
    /// Returns the transmission times and the completion event.
    fn run_send(ack_on: Option<usize>) -> (Vec<u32>, MacEvent) {
        let (mut mac, radio, mut timer) = csma_ack();

        let seq = mac.send(Address::from(2), &[1, 2, 3]).unwrap();

        let mut tx_times = vec![];
        for t in 0..5000 {
            timer.set_ms(t);

            let event = mac.poll().unwrap();

            if radio.sent().len() > tx_times.len() {
                tx_times.push(t);

                if Some(tx_times.len()) == ack_on {
                    assert_eq!(mac.receive(&ack(2, 1, seq)), Ok(None));
                }
            }

            if let Some(e) = event.or_else(|| mac.poll().unwrap()) {
                assert!(!mac.busy());
                return (tx_times, e);
            }
        }

        panic!("send did not complete");
    }

    #[test]
    fn success_after_n_attempts() {
        for n in 1..=3 {
            let (times, event) = run_send(Some(n));

            assert_eq!(times.len(), n);
            assert_eq!(event, MacEvent::Sent{ seq: 1, dst: Address::from(2) });
        }
    }

    #[test]
    fn fails_after_max_attempts() {
        let (times, event) = run_send(None);

        // ACK timeout of 200 ms and retry backoff of 100 ms per attempt
        assert_eq!(times, vec![0, 300, 700]);
        assert_eq!(event, MacEvent::SendFailed{ seq: 1, dst: Address::from(2), reason: TxFailure::AckTimeout });
    }

    #[test]
    fn ack_too_late_not_retried() {
        let (times, _event) = run_send(Some(4));
        assert_eq!(times.len(), 3);
    }

    #[test]
    fn broadcast_not_acknowledged() {
        let (mut mac, radio, mut timer) = csma_ack();

        let seq = mac.send(Address::BROADCAST, &[1]).unwrap();

        timer.set_ms(0);
        assert_eq!(mac.poll(), Ok(Some(MacEvent::Sent{ seq, dst: Address::BROADCAST })));

        let (info, _n) = HeaderInfo::decode(&radio.sent()[0]).unwrap();
        assert!(!info.ack_requested());
    }

    #[test]
    fn mismatched_ack_ignored() {
        let (mut mac, _radio, mut timer) = csma_ack();

        let seq = mac.send(Address::from(2), &[1]).unwrap();
        timer.set_ms(0);
        mac.poll().unwrap();
        assert_eq!(mac.state(), AckState::AwaitingAck{ until: 200 });

        // Wrong sequence number, then wrong sender
        mac.receive(&ack(2, 1, seq + 1)).unwrap();
        mac.receive(&ack(3, 1, seq)).unwrap();
        assert_eq!(mac.state(), AckState::AwaitingAck{ until: 200 });

        mac.receive(&ack(2, 1, seq)).unwrap();
        assert_eq!(mac.state(), AckState::Idle);
        assert_eq!(mac.poll(), Ok(Some(MacEvent::Sent{ seq, dst: Address::from(2) })));
    }

    #[test]
    fn cancel_stops_retries() {
        let (mut mac, radio, mut timer) = csma_ack();

        let seq = mac.send(Address::from(2), &[1]).unwrap();
        timer.set_ms(0);
        mac.poll().unwrap();
        assert_eq!(mac.state(), AckState::AwaitingAck{ until: 200 });

        assert!(mac.cancel(seq));
        assert_eq!(mac.state(), AckState::Idle);
        assert!(!mac.busy());
        assert_eq!(mac.next_deadline(), None);

        for t in 0..1000 {
            timer.set_ms(t);
            assert_eq!(mac.poll(), Ok(None));
        }
        assert_eq!(radio.sent().len(), 1);
        assert!(!mac.cancel(seq));

        // A late ACK for the abandoned send completes nothing
        mac.receive(&ack(2, 1, seq)).unwrap();
        assert_eq!(mac.poll(), Ok(None));
    }

    #[test]
    fn cancel_queued_send() {
        let (mut mac, radio, mut timer) = csma_ack();

        let a = mac.send(Address::from(2), &[1]).unwrap();
        let b = mac.send(Address::from(3), &[2]).unwrap();
        assert!(mac.cancel(b));

        timer.set_ms(0);
        mac.poll().unwrap();
        mac.receive(&ack(2, 1, a)).unwrap();
        assert_eq!(mac.poll(), Ok(Some(MacEvent::Sent{ seq: a, dst: Address::from(2) })));

        for t in 0..1000 {
            timer.set_ms(t);
            assert_eq!(mac.poll(), Ok(None));
        }
        assert_eq!(radio.sent().len(), 1);
    }

    #[test]
    fn acknowledges_unicast_requests() {
        let (mut mac, radio, _timer) = csma_ack();

        let mut info = HeaderInfo::new(Address::from(1));
        info.original_src = Address::from(3);
        info.seq = 9;
        info.flags = InfoFlags::ACK_REQUESTED;

        let f = frame(&info, &[4, 5]);
        let d = mac.receive(&f).unwrap().unwrap();
        assert_eq!(d.payload, &[4, 5]);

        let sent = radio.sent();
        assert_eq!(sent.len(), 1);

        let (a, n) = HeaderInfo::decode(&sent[0]).unwrap();
        assert_eq!(n, sent[0].len());
        assert!(a.is_ack());
        assert_eq!(a.seq, 9);
        assert_eq!(a.next_hop(), Address::from(3));
        assert_eq!(a.prev_hop(), Address::from(1));

        // No ACK for broadcasts
        info.original_dst = Address::BROADCAST;
        assert!(mac.receive(&frame(&info, &[1])).unwrap().is_some());
        assert_eq!(radio.sent().len(), 1);
    }

    #[test]
    fn learns_neighbours() {
        let (mut mac, _radio, _timer) = csma_ack();

        assert!(mac.is_known_dst(&Address::BROADCAST));
        assert!(!mac.is_known_dst(&Address::from(3)));

        let mut info = HeaderInfo::new(Address::BROADCAST);
        info.original_src = Address::from(3);
        mac.receive(&frame(&info, &[])).unwrap();

        assert!(mac.is_known_dst(&Address::from(3)));
        assert_eq!(mac.neighbours(), &[Address::from(3)]);
    }

    #[test]
    fn neighbour_table_bounded() {
        let (mut mac, _radio, _timer) = csma_ack();

        for a in 2..(NEIGHBOUR_TABLE_LEN as u16 + 6) {
            let mut info = HeaderInfo::new(Address::BROADCAST);
            info.original_src = Address::from(a);
            mac.receive(&frame(&info, &[])).unwrap();
        }

        assert_eq!(mac.neighbours().len(), NEIGHBOUR_TABLE_LEN);
        assert!(mac.is_known_dst(&Address::from(NEIGHBOUR_TABLE_LEN as u16 + 5)));
    }
}
