//! Sensor node runtime
//
// Ties together the alarm scheduler, the active MAC protocol and the
// forwarder. MAC timing (backoff, ACK timeouts, delayed sends) is driven by
// a dedicated scheduler alarm that is re-armed to the MAC's next deadline
// after every operation that can change it.

use log::{debug, warn, error};

use heapless::spsc::Queue;
use rand_core::RngCore;

use crate::MAX_FRAME_LEN;
use crate::address::Address;
use crate::alarm::{AlarmError, AlarmFn, AlarmId, Alarms};
use crate::error::{MacError, NetError};
use crate::header::HeaderInfo;
use crate::mac::{Mac, MacConfig, MacEvent, Protocol, ProtocolKind};
use crate::net::{Forwarded, Forwarder, ForwarderConfig, ReceiveFn};
use crate::radio::Radio;
use crate::timer::{Jiffies, Timer};

/// MAC events buffered for the application (one slot is reserved)
pub const NODE_EVENT_QUEUE_LEN: usize = 8;

/// Node state passed to alarm callbacks
pub struct Stack<R, T, G, S, const Q: usize, const P: usize> {
    pub mac: Protocol<R, T, G, Q>,
    pub forwarder: Forwarder<S, P>,
    /// Application state, passed to port receivers
    pub app: S,
    events: Queue<MacEvent, NODE_EVENT_QUEUE_LEN>,
}

/// Alarm callback type for a node's scheduler
pub type NodeAlarmFn<R, T, G, S, const Q: usize, const A: usize, const P: usize> = AlarmFn<T, Stack<R, T, G, S, Q, P>, A>;

impl <R, T, G, S, const Q: usize, const P: usize> Stack<R, T, G, S, Q, P>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    /// Collect completed sends from the MAC
    pub fn service(&mut self) -> Result<(), MacError<R::Error>> {
        while let Some(e) = self.mac.poll()? {
            debug!("MAC event: {:?}", e);

            if let Err(e) = self.events.enqueue(e) {
                error!("Node event queue full, dropping {:?}", e);
            }
        }

        Ok(())
    }

    /// Pass a packet through the forwarder
    pub fn forward(&mut self, info: &HeaderInfo, data: &[u8]) -> Result<Forwarded, MacError<R::Error>> {
        let now = self.mac.now();
        self.forwarder.forward(&mut self.mac, &mut self.app, now, info, data)
    }

    /// Hand a received frame to the MAC, forwarding whatever it delivers
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<Option<Forwarded>, MacError<R::Error>> {
        let d = match self.mac.receive(frame)? {
            Some(d) => d,
            None => return Ok(None),
        };

        self.forward(&d.info, d.payload).map(Some)
    }

    /// Drain frames waiting in the radio
    pub fn poll_radio(&mut self) -> Result<usize, MacError<R::Error>> {
        let mut buff = [0u8; MAX_FRAME_LEN];
        let mut n = 0;

        while let Some(len) = self.mac.radio().receive(&mut buff).map_err(MacError::Radio)? {
            if let Err(e) = self.handle_frame(&buff[..len]) {
                warn!("Failed to handle received frame: {:?}", e);
            }
            n += 1;
        }

        Ok(n)
    }

    /// Point the MAC alarm at the MAC's next deadline
    fn rearm<const A: usize>(&self, alarms: &mut Alarms<T, Self, A>, id: AlarmId) {
        let r = match self.mac.next_deadline() {
            Some(t) => alarms.schedule_at(id, t),
            None => alarms.cancel(id),
        };

        if let Err(e) = r {
            error!("Failed to arm MAC alarm: {:?}", e);
        }
    }
}

/// Sensor node, generic over a Radio (R), Timer (T), random source (G),
/// application state (S), outbound queue length (Q), alarm count (A) and
/// receiver count (P)
pub struct Node<R, T, G, S, const Q: usize, const A: usize, const P: usize> {
    alarms: Alarms<T, Stack<R, T, G, S, Q, P>, A>,
    stack: Stack<R, T, G, S, Q, P>,
    mac_alarm: AlarmId,
}

impl <R, T, G, S, const Q: usize, const A: usize, const P: usize> Node<R, T, G, S, Q, A, P>
where
    R: Radio,
    T: Timer + Clone,
    G: RngCore,
{
    /// Create a node running the `kind` MAC protocol
    pub fn new(kind: ProtocolKind, radio: R, timer: T, rng: G, mac: MacConfig, net: ForwarderConfig, app: S) -> Result<Self, AlarmError> {
        let mut alarms = Alarms::new(timer.clone());
        let mac_alarm = alarms.init(Self::mac_alarm_fired, 0)?;

        debug!("Node {:?} using {} MAC", mac.address, kind);

        let stack = Stack {
            mac: Protocol::new(kind, radio, timer, rng, mac),
            forwarder: Forwarder::new(net),
            app,
            events: Queue::new(),
        };

        Ok(Self { alarms, stack, mac_alarm })
    }

    fn mac_alarm_fired(stack: &mut Stack<R, T, G, S, Q, P>, alarms: &mut Alarms<T, Stack<R, T, G, S, Q, P>, A>, id: AlarmId, _arg: usize) {
        if let Err(e) = stack.service() {
            warn!("MAC poll failed: {:?}", e);
        }
        stack.rearm(alarms, id);
    }

    fn rearm(&mut self) {
        self.stack.rearm(&mut self.alarms, self.mac_alarm);
    }

    /// Power up the radio
    pub fn init(&mut self) -> Result<(), MacError<R::Error>> {
        self.stack.mac.init()
    }

    pub fn address(&self) -> Address {
        self.stack.mac.address()
    }

    pub fn now(&self) -> Jiffies {
        self.alarms.now()
    }

    /// Send `data` to `dst` using the MAC defaults
    pub fn mac_send(&mut self, dst: Address, data: &[u8]) -> Result<u8, MacError<R::Error>> {
        let seq = self.stack.mac.send(dst, data)?;
        self.rearm();
        Ok(seq)
    }

    /// Send `data` with an explicit header descriptor
    pub fn mac_send_ex(&mut self, info: &HeaderInfo, data: &[u8]) -> Result<u8, MacError<R::Error>> {
        let seq = self.stack.mac.send_ex(info, data)?;
        self.rearm();
        Ok(seq)
    }

    /// Abandon a queued or in flight send
    pub fn cancel(&mut self, seq: u8) -> bool {
        let cancelled = self.stack.mac.cancel(seq);
        self.rearm();
        cancelled
    }

    /// Route a packet through the forwarder
    pub fn forward(&mut self, info: &HeaderInfo, data: &[u8]) -> Result<Forwarded, MacError<R::Error>> {
        let r = self.stack.forward(info, data);
        self.rearm();
        r
    }

    pub fn register_receiver(&mut self, port: u8, callback: ReceiveFn<S>) -> Result<(), NetError> {
        self.stack.forwarder.register_receiver(port, callback)
    }

    pub fn unregister_receiver(&mut self, port: u8) -> bool {
        self.stack.forwarder.unregister_receiver(port)
    }

    /// Handle a frame from the radio receive path
    pub fn receive(&mut self, frame: &[u8]) -> Result<Option<Forwarded>, MacError<R::Error>> {
        let r = self.stack.handle_frame(frame);

        // ACKs complete sends on receipt
        if let Err(e) = self.stack.service() {
            warn!("MAC poll failed: {:?}", e);
        }
        self.rearm();

        r
    }

    /// Run one scheduling pass: drain the radio then fire due alarms.
    ///
    /// Alarms run even when the radio fails, the radio error is returned
    /// after the pass. Otherwise returns the number of alarms fired.
    pub fn process(&mut self) -> Result<usize, MacError<R::Error>> {
        let polled = self.stack.poll_radio();
        if let Err(e) = &polled {
            warn!("Radio receive failed: {:?}", e);
        }

        let fired = self.alarms.process(&mut self.stack);

        self.rearm();

        polled.map(|_n| fired)
    }

    /// Next completed or failed send
    pub fn take_event(&mut self) -> Option<MacEvent> {
        self.stack.events.dequeue()
    }

    /// Register an application alarm
    pub fn add_alarm(&mut self, callback: NodeAlarmFn<R, T, G, S, Q, A, P>, arg: usize) -> Result<AlarmId, AlarmError> {
        self.alarms.init(callback, arg)
    }

    pub fn alarms(&mut self) -> &mut Alarms<T, Stack<R, T, G, S, Q, P>, A> {
        &mut self.alarms
    }

    /// Earliest wake-up the node needs, for sizing low-power sleep
    pub fn next_wakeup(&self) -> Option<Jiffies> {
        self.alarms.next_deadline()
    }

    pub fn has_pending(&self) -> bool {
        self.alarms.has_pending()
    }

    pub fn has_ready(&self) -> bool {
        self.alarms.has_ready(self.alarms.now())
    }

    pub fn mac(&mut self) -> &mut Protocol<R, T, G, Q> {
        &mut self.stack.mac
    }

    pub fn app(&self) -> &S {
        &self.stack.app
    }

    pub fn app_mut(&mut self) -> &mut S {
        &mut self.stack.app
    }
}
