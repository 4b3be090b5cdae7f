//! Packet forwarding between the MAC and upper layers
//
// Every packet passes through `Forwarder::forward`: locally originated
// packets go down to the MAC, packets for this node (or broadcast) are
// dispatched by destination port and anything else is relayed with its
// hop limit decremented.

use log::{debug, info, warn};

use heapless::Vec;

use crate::address::Address;
use crate::error::NetError;
use crate::header::{HeaderInfo, InfoFlags};
use crate::mac::Mac;
use crate::timer::Jiffies;

/// Receivers registered on this port see packets for every port
pub const PORT_ANY: u8 = 0;

/// Upper layer receive callback, invoked with the caller's context
pub type ReceiveFn<C> = fn(&mut C, &HeaderInfo, &[u8]);

#[derive(Clone, PartialEq, Debug)]
pub struct ForwarderConfig {
    /// Local node address
    pub address: Address,

    /// Delay before relaying a packet in milliseconds
    pub forwarding_delay_ms: u32,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            address: Address::UNSPECIFIED,
            forwarding_delay_ms: 1,
        }
    }
}

impl ForwarderConfig {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }
}

/// Reason a packet was discarded
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dropped {
    /// Relay packet ran out of hops
    HopLimitExceeded,
    /// No receiver registered for the destination port
    NoReceiver,
    /// Relaying needs a short local address to carry as the immediate source
    LongRelayAddress,
}

/// What happened to a forwarded packet
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Forwarded {
    /// Locally originated, queued with the MAC under this sequence number
    Sent(u8),
    /// Dispatched to this many receivers
    Delivered(usize),
    /// Queued for the next hop under this sequence number
    Relayed(u8),
    Dropped(Dropped),
}

struct Receiver<C> {
    port: u8,
    callback: ReceiveFn<C>,
}

/// Networking forwarder, generic over the receiver context (C) and
/// the maximum number of registered receivers (P)
pub struct Forwarder<C, const P: usize> {
    config: ForwarderConfig,
    receivers: Vec<Receiver<C>, P>,
}

impl <C, const P: usize> Forwarder<C, P> {
    pub fn new(config: ForwarderConfig) -> Self {
        info!("Setup forwarder with address: {:?}", config.address);

        Self {
            config,
            receivers: Vec::new(),
        }
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Register `callback` for packets to `port`, replacing any existing
    /// receiver on that port
    pub fn register_receiver(&mut self, port: u8, callback: ReceiveFn<C>) -> Result<(), NetError> {
        if let Some(r) = self.receivers.iter_mut().find(|r| r.port == port) {
            r.callback = callback;
            return Ok(());
        }

        self.receivers.push(Receiver{ port, callback })
            .map_err(|_| NetError::ReceiverTableFull)
    }

    pub fn unregister_receiver(&mut self, port: u8) -> bool {
        match self.receivers.iter().position(|r| r.port == port) {
            Some(i) => {
                self.receivers.swap_remove(i);
                true
            },
            None => false,
        }
    }

    /// Route a packet, inbound or outbound, local or relayed
    pub fn forward<M: Mac>(&mut self, mac: &mut M, ctx: &mut C, now: Jiffies, info: &HeaderInfo, data: &[u8]) -> Result<Forwarded, M::Error> {
        if info.is_local() {
            let seq = mac.send_ex(info, data)?;
            return Ok(Forwarded::Sent(seq));
        }

        let dst = info.original_dst;
        if dst == self.config.address || dst.is_broadcast() {
            return Ok(self.deliver(ctx, info, data));
        }

        self.relay(mac, now, info, data)
    }

    fn deliver(&mut self, ctx: &mut C, info: &HeaderInfo, data: &[u8]) -> Forwarded {
        let mut n = 0;

        for r in self.receivers.iter().filter(|r| r.port == info.dst_port || r.port == PORT_ANY) {
            (r.callback)(ctx, info, data);
            n += 1;
        }

        if n == 0 {
            debug!("No receiver for port {}, dropping", info.dst_port);
            return Forwarded::Dropped(Dropped::NoReceiver);
        }

        Forwarded::Delivered(n)
    }

    fn relay<M: Mac>(&mut self, mac: &mut M, now: Jiffies, info: &HeaderInfo, data: &[u8]) -> Result<Forwarded, M::Error> {
        let mut fwd = info.clone();

        fwd.hop_limit = fwd.hop_limit.saturating_sub(1);
        if fwd.hop_limit == 0 {
            debug!("Hop limit reached for packet from {:?} to {:?}", info.original_src, info.original_dst);
            return Ok(Forwarded::Dropped(Dropped::HopLimitExceeded));
        }

        // Immediate addresses are short only
        if self.config.address.is_long() {
            warn!("Cannot relay packet to {:?} from long address {:?}", info.original_dst, self.config.address);
            return Ok(Forwarded::Dropped(Dropped::LongRelayAddress));
        }

        fwd.immed_src = self.config.address;
        fwd.immed_dst = Address::UNSPECIFIED;
        fwd.seq = 0;
        fwd.flags.remove(InfoFlags::LOCAL | InfoFlags::IS_ACK);
        fwd.send_at = now.wrapping_add(self.config.forwarding_delay_ms);

        debug!("Relaying packet from {:?} to {:?} ({} hops left)", fwd.original_src, fwd.original_dst, fwd.hop_limit);

        match mac.send_ex(&fwd, data) {
            Ok(seq) => Ok(Forwarded::Relayed(seq)),
            Err(e) => {
                warn!("Failed to relay packet to {:?}", fwd.original_dst);
                Err(e)
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::vec;
    use std::vec::Vec;

    use crate::header::HeaderError;
    use crate::mac::{Delivery, MacEvent};
    use super::*;

    /// MAC stub recording queued packets
    #[derive(Default)]
    struct StubMac {
        sent: Vec<(HeaderInfo, Vec<u8>)>,
        seq: u8,
    }

    impl Mac for StubMac {
        type Error = ();

        fn init(&mut self) -> Result<(), ()> {
            Ok(())
        }

        fn send(&mut self, dst: Address, data: &[u8]) -> Result<u8, ()> {
            self.send_ex(&HeaderInfo::new(dst), data)
        }

        fn send_ex(&mut self, info: &HeaderInfo, data: &[u8]) -> Result<u8, ()> {
            self.seq += 1;
            self.sent.push((info.clone(), data.to_vec()));
            Ok(self.seq)
        }

        fn receive<'a>(&mut self, _frame: &'a [u8]) -> Result<Option<Delivery<'a>>, ()> {
            Ok(None)
        }

        fn poll(&mut self) -> Result<Option<MacEvent>, ()> {
            Ok(None)
        }

        fn cancel(&mut self, _seq: u8) -> bool {
            false
        }

        fn is_known_dst(&self, _dst: &Address) -> bool {
            true
        }

        fn build_header(&self, info: &HeaderInfo, buf: &mut [u8]) -> Result<usize, HeaderError> {
            info.encode(buf)
        }

        fn next_deadline(&self) -> Option<Jiffies> {
            None
        }

        fn busy(&self) -> bool {
            false
        }
    }

    /// Received (port, payload) pairs
    type Inbox = Vec<(u8, Vec<u8>)>;

    fn record(inbox: &mut Inbox, info: &HeaderInfo, data: &[u8]) {
        inbox.push((info.dst_port, data.to_vec()));
    }

    fn record_any(inbox: &mut Inbox, _info: &HeaderInfo, data: &[u8]) {
        inbox.push((PORT_ANY, data.to_vec()));
    }

    fn forwarder() -> Forwarder<Inbox, 4> {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());
        Forwarder::new(ForwarderConfig::new(Address::from(2)))
    }

    fn relay_packet(hop_limit: u8) -> HeaderInfo {
        let mut info = HeaderInfo::new(Address::from(3));
        info.original_src = Address::from(1);
        info.immed_src = Address::from(1);
        info.immed_dst = Address::from(2);
        info.seq = 7;
        info.hop_limit = hop_limit;
        info
    }

    #[test]
    fn relay_hop_limit_one_dropped() {
        let mut f = forwarder();
        let mut mac = StubMac::default();
        let mut inbox = Inbox::new();

        let r = f.forward(&mut mac, &mut inbox, 0, &relay_packet(1), &[1, 2]);

        assert_eq!(r, Ok(Forwarded::Dropped(Dropped::HopLimitExceeded)));
        assert!(mac.sent.is_empty());
    }

    #[test]
    fn relay_hop_limit_two_sent_once() {
        let mut f = forwarder();
        let mut mac = StubMac::default();
        let mut inbox = Inbox::new();

        let r = f.forward(&mut mac, &mut inbox, 100, &relay_packet(2), &[1, 2]);
        assert_eq!(r, Ok(Forwarded::Relayed(1)));

        assert_eq!(mac.sent.len(), 1);
        let (info, data) = &mac.sent[0];
        assert_eq!(info.hop_limit, 1);
        assert_eq!(info.original_src, Address::from(1));
        assert_eq!(info.original_dst, Address::from(3));
        assert_eq!(info.prev_hop(), Address::from(2));
        assert_eq!(info.next_hop(), Address::from(3));
        assert_eq!(info.seq, 0);
        assert_eq!(info.send_at, 101);
        assert!(!info.is_local());
        assert_eq!(data, &vec![1, 2]);
        assert!(inbox.is_empty());
    }

    #[test]
    fn relay_without_hop_limit_dropped() {
        let mut f = forwarder();
        let mut mac = StubMac::default();
        let mut inbox = Inbox::new();

        let r = f.forward(&mut mac, &mut inbox, 0, &relay_packet(0), &[1]);
        assert_eq!(r, Ok(Forwarded::Dropped(Dropped::HopLimitExceeded)));
    }

    #[test]
    fn long_addressed_node_does_not_relay() {
        let local = Address::from([2, 0, 0, 0, 0, 0, 0, 1]);
        let mut f: Forwarder<Inbox, 4> = Forwarder::new(ForwarderConfig::new(local));
        let mut mac = StubMac::default();
        let mut inbox = Inbox::new();

        let mut info = relay_packet(3);
        info.immed_dst = Address::UNSPECIFIED;

        let r = f.forward(&mut mac, &mut inbox, 0, &info, &[1]);
        assert_eq!(r, Ok(Forwarded::Dropped(Dropped::LongRelayAddress)));
        assert!(mac.sent.is_empty());

        // Packets for the long address itself are still delivered
        f.register_receiver(PORT_ANY, record_any).unwrap();
        let info = HeaderInfo::new(local);
        assert_eq!(f.forward(&mut mac, &mut inbox, 0, &info, &[2]), Ok(Forwarded::Delivered(1)));
    }

    #[test]
    fn local_packets_sent() {
        let mut f = forwarder();
        let mut mac = StubMac::default();
        let mut inbox = Inbox::new();

        let mut info = HeaderInfo::new(Address::from(3));
        info.flags = InfoFlags::LOCAL;

        assert_eq!(f.forward(&mut mac, &mut inbox, 0, &info, &[9]), Ok(Forwarded::Sent(1)));
        assert_eq!(mac.sent.len(), 1);
        assert!(mac.sent[0].0.is_local());
    }

    #[test]
    fn dispatch_by_port() {
        let mut f = forwarder();
        let mut mac = StubMac::default();
        let mut inbox = Inbox::new();

        f.register_receiver(10, record).unwrap();

        let mut info = HeaderInfo::new(Address::from(2));
        info.dst_port = 10;
        assert_eq!(f.forward(&mut mac, &mut inbox, 0, &info, &[1]), Ok(Forwarded::Delivered(1)));

        // Unregistered port
        info.dst_port = 11;
        assert_eq!(f.forward(&mut mac, &mut inbox, 0, &info, &[2]), Ok(Forwarded::Dropped(Dropped::NoReceiver)));

        // Broadcasts are delivered locally
        info.original_dst = Address::BROADCAST;
        info.dst_port = 10;
        assert_eq!(f.forward(&mut mac, &mut inbox, 0, &info, &[3]), Ok(Forwarded::Delivered(1)));

        assert_eq!(inbox, vec![(10, vec![1]), (10, vec![3])]);
        assert!(mac.sent.is_empty());
    }

    #[test]
    fn port_any_sees_all() {
        let mut f = forwarder();
        let mut mac = StubMac::default();
        let mut inbox = Inbox::new();

        f.register_receiver(PORT_ANY, record_any).unwrap();
        f.register_receiver(10, record).unwrap();

        let mut info = HeaderInfo::new(Address::from(2));
        info.dst_port = 10;
        assert_eq!(f.forward(&mut mac, &mut inbox, 0, &info, &[1]), Ok(Forwarded::Delivered(2)));

        info.dst_port = 12;
        assert_eq!(f.forward(&mut mac, &mut inbox, 0, &info, &[2]), Ok(Forwarded::Delivered(1)));

        assert_eq!(inbox, vec![(PORT_ANY, vec![1]), (10, vec![1]), (PORT_ANY, vec![2])]);
    }

    #[test]
    fn receiver_table() {
        let mut f: Forwarder<Inbox, 2> = Forwarder::new(ForwarderConfig::new(Address::from(2)));

        f.register_receiver(1, record).unwrap();
        f.register_receiver(2, record).unwrap();
        f.register_receiver(2, record_any).unwrap();
        assert_eq!(f.register_receiver(3, record), Err(NetError::ReceiverTableFull));

        assert!(f.unregister_receiver(1));
        assert!(!f.unregister_receiver(1));
        f.register_receiver(3, record).unwrap();
    }
}
