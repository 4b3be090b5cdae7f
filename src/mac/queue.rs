//! Bounded outbound packet queue
//
// Owned by the active protocol. Each slot is idle, queued or in flight;
// packets leave the queue in the order they were accepted.

use crate::FrameBuf;
use crate::header::HeaderInfo;
use crate::timer::{Jiffies, expired};

/// Packet pending transmission
#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    pub info: HeaderInfo,
    pub data: FrameBuf,
    /// Transmission attempts made so far
    pub attempts: u8,
    ticket: u32,
}

impl Outbound {
    pub fn new(info: HeaderInfo, data: FrameBuf) -> Self {
        Self {
            info,
            data,
            attempts: 0,
            ticket: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Slot {
    Idle,
    Queued(Outbound),
    InFlight(Outbound),
}

impl Slot {
    pub fn is_idle(&self) -> bool {
        matches!(self, Slot::Idle)
    }
}

pub struct OutboundQueue<const Q: usize> {
    slots: [Slot; Q],
    next_ticket: u32,
}

impl <const Q: usize> Default for OutboundQueue<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl <const Q: usize> OutboundQueue<Q> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot::Idle),
            next_ticket: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        Q
    }

    /// Number of occupied (queued or in flight) slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_idle()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == Q
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Accept a packet into a free slot, handing it back when full
    pub fn enqueue(&mut self, mut packet: Outbound) -> Result<usize, Outbound> {
        let index = match self.slots.iter().position(|s| s.is_idle()) {
            Some(i) => i,
            None => return Err(packet),
        };

        packet.ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);

        self.slots[index] = Slot::Queued(packet);

        Ok(index)
    }

    /// The packet currently in flight
    pub fn in_flight(&mut self) -> Option<(usize, &mut Outbound)> {
        self.slots.iter_mut()
            .enumerate()
            .find_map(|(i, s)| match s {
                Slot::InFlight(p) => Some((i, p)),
                _ => None,
            })
    }

    /// Promote the oldest queued packet due at `now` to in flight.
    ///
    /// Does nothing while another packet is in flight.
    pub fn start_next(&mut self, now: Jiffies) -> Option<usize> {
        if self.in_flight().is_some() {
            return None;
        }

        let base = self.next_ticket;
        let index = self.slots.iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Slot::Queued(p) if expired(p.info.send_at, now) => Some((i, p.ticket)),
                _ => None,
            })
            // Oldest ticket is furthest behind the next one
            .max_by_key(|(_i, t)| base.wrapping_sub(*t))
            .map(|(i, _t)| i)?;

        let slot = core::mem::replace(&mut self.slots[index], Slot::Idle);
        if let Slot::Queued(p) = slot {
            self.slots[index] = Slot::InFlight(p);
        }

        Some(index)
    }

    /// Free the in flight packet's slot, returning the packet
    pub fn complete(&mut self) -> Option<Outbound> {
        let (index, _p) = self.in_flight()?;

        match core::mem::replace(&mut self.slots[index], Slot::Idle) {
            Slot::InFlight(p) => Some(p),
            _ => None,
        }
    }

    /// Free the slot holding sequence number `seq`, returning what it held
    pub fn remove(&mut self, seq: u8) -> Option<Slot> {
        let index = self.slots.iter().position(|s| match s {
            Slot::Queued(p) | Slot::InFlight(p) => p.info.seq == seq,
            Slot::Idle => false,
        })?;

        Some(core::mem::replace(&mut self.slots[index], Slot::Idle))
    }

    /// Earliest send time of the queued packets relative to `now`
    pub fn next_send_at(&self, now: Jiffies) -> Option<Jiffies> {
        self.slots.iter()
            .filter_map(|s| match s {
                Slot::Queued(p) => Some(p.info.send_at),
                _ => None,
            })
            .min_by_key(|t| t.wrapping_sub(now) as i32)
    }
}

#[cfg(test)]
mod test {
    use std::vec;

    use crate::address::Address;
    use super::*;

    fn packet(dst: u16, send_at: Jiffies) -> Outbound {
        let mut info = HeaderInfo::new(Address::from(dst));
        info.send_at = send_at;
        Outbound::new(info, FrameBuf::from_slice(&[dst as u8]).unwrap())
    }

    #[test]
    fn rejects_when_full() {
        let mut q = OutboundQueue::<1>::new();

        assert_eq!(q.enqueue(packet(1, 0)), Ok(0));
        assert!(q.is_full());

        let p = packet(2, 0);
        assert_eq!(q.enqueue(p.clone()), Err(p));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn fifo_order_and_single_in_flight() {
        let mut q = OutboundQueue::<3>::new();

        q.enqueue(packet(1, 0)).unwrap();
        q.enqueue(packet(2, 0)).unwrap();
        q.enqueue(packet(3, 0)).unwrap();

        assert_eq!(q.start_next(0), Some(0));
        assert_eq!(q.start_next(0), None);

        // Freed slot is reused but the new packet goes to the back
        assert_eq!(q.complete().unwrap().info.original_dst, Address::from(1));
        assert_eq!(q.enqueue(packet(4, 0)), Ok(0));

        let mut order = vec![];
        while let Some(_i) = q.start_next(0) {
            order.push(q.complete().unwrap().info.original_dst);
        }
        assert_eq!(order, vec![Address::from(2), Address::from(3), Address::from(4)]);
        assert!(q.is_empty());
    }

    #[test]
    fn holds_packets_until_send_time() {
        let mut q = OutboundQueue::<2>::new();

        q.enqueue(packet(1, 50)).unwrap();
        assert_eq!(q.next_send_at(0), Some(50));

        assert_eq!(q.start_next(49), None);
        assert_eq!(q.start_next(50), Some(0));
        assert!(matches!(q.slot(0), Some(Slot::InFlight(_))));
    }

    #[test]
    fn remove_frees_slot() {
        let mut q = OutboundQueue::<2>::new();

        let mut a = packet(1, 0);
        a.info.seq = 5;
        let mut b = packet(2, 0);
        b.info.seq = 6;

        q.enqueue(a).unwrap();
        q.enqueue(b).unwrap();
        q.start_next(0).unwrap();

        assert!(matches!(q.remove(6), Some(Slot::Queued(_))));
        assert!(matches!(q.remove(5), Some(Slot::InFlight(_))));
        assert_eq!(q.remove(5), None);

        assert!(q.is_empty());
        assert!(q.in_flight().is_none());
        assert_eq!(q.start_next(0), None);
    }
}
