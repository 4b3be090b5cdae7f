//! Alarm scheduler
//
// Deadline-ordered set of timed callbacks. Alarms with equal deadlines fire
// in the order they were scheduled. The scheduler is either processed
// directly from the timer interrupt, or shared with the interrupt through
// `critical::Shared` and drained by a worker when a `PendingFlag` is raised.

use heapless::Vec;

use log::{trace, debug};

use crate::critical::{CriticalSection, PendingFlag, Shared};
use crate::timer::{Jiffies, Timer, time_after};

/// Alarm callback, invoked with the caller context, the scheduler (so the
/// callback can reschedule itself or others), the alarm handle and the bound
/// argument.
pub type AlarmFn<T, C, const N: usize> = fn(&mut C, &mut Alarms<T, C, N>, AlarmId, usize);

/// Handle to an alarm registered with a scheduler
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlarmId(u8);

impl AlarmId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmState {
    Idle,
    Scheduled(Jiffies),
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmError {
    /// No free registration slots
    TableFull,
    /// Handle does not belong to this scheduler
    Unknown(AlarmId),
}

struct Registration<T, C, const N: usize> {
    callback: AlarmFn<T, C, N>,
    arg: usize,
    state: AlarmState,
    /// Processing pass during which the alarm was last scheduled
    pass: u32,
}

/// Alarm scheduler over a timer `T`, a callback context `C` and up to `N` alarms
pub struct Alarms<T, C, const N: usize> {
    timer: T,
    registered: Vec<Registration<T, C, N>, N>,
    /// Scheduled alarms, ascending by deadline (FIFO on ties)
    queue: Vec<AlarmId, N>,
    pass: u32,
}

impl <T, C, const N: usize> Alarms<T, C, N>
where
    T: Timer,
{
    pub fn new(timer: T) -> Self {
        Self {
            timer,
            registered: Vec::new(),
            queue: Vec::new(),
            pass: 0,
        }
    }

    /// Current time from the underlying timer
    pub fn now(&self) -> Jiffies {
        self.timer.jiffies()
    }

    /// Register an alarm, binding its callback and argument.
    ///
    /// The alarm starts idle.
    pub fn init(&mut self, callback: AlarmFn<T, C, N>, arg: usize) -> Result<AlarmId, AlarmError> {
        if self.registered.len() > u8::MAX as usize {
            return Err(AlarmError::TableFull);
        }

        let id = AlarmId(self.registered.len() as u8);

        self.registered.push(Registration{
            callback,
            arg,
            state: AlarmState::Idle,
            pass: 0,
        }).map_err(|_| AlarmError::TableFull)?;

        Ok(id)
    }

    /// Re-bind the callback and argument of an existing alarm, cancelling it
    pub fn rebind(&mut self, id: AlarmId, callback: AlarmFn<T, C, N>, arg: usize) -> Result<(), AlarmError> {
        self.cancel(id)?;

        let r = self.registration(id)?;
        r.callback = callback;
        r.arg = arg;

        Ok(())
    }

    /// Schedule (or reschedule) an alarm to fire `delay_ms` from now
    pub fn schedule(&mut self, id: AlarmId, delay_ms: u32) -> Result<(), AlarmError> {
        let deadline = self.timer.jiffies().wrapping_add(delay_ms);
        self.schedule_at(id, deadline)
    }

    /// Schedule (or reschedule) an alarm for an absolute deadline
    pub fn schedule_at(&mut self, id: AlarmId, deadline: Jiffies) -> Result<(), AlarmError> {
        let pass = self.pass;

        let r = self.registration(id)?;
        let was_scheduled = r.state != AlarmState::Idle;
        r.state = AlarmState::Scheduled(deadline);
        r.pass = pass;

        if was_scheduled {
            self.unlink(id);
        }

        self.link(id, deadline);

        trace!("Alarm {} scheduled for {}", id.0, deadline);

        Ok(())
    }

    /// Cancel an alarm, no-op if not scheduled
    pub fn cancel(&mut self, id: AlarmId) -> Result<(), AlarmError> {
        let r = self.registration(id)?;
        if r.state == AlarmState::Idle {
            return Ok(());
        }
        r.state = AlarmState::Idle;

        self.unlink(id);

        Ok(())
    }

    pub fn state(&self, id: AlarmId) -> Result<AlarmState, AlarmError> {
        self.registered.get(id.index())
            .map(|r| r.state)
            .ok_or(AlarmError::Unknown(id))
    }

    pub fn is_scheduled(&self, id: AlarmId) -> bool {
        matches!(self.state(id), Ok(AlarmState::Scheduled(_)))
    }

    /// Deadline of the next alarm to fire, if any
    pub fn next_deadline(&self) -> Option<Jiffies> {
        self.queue.first().and_then(|id| self.deadline(*id))
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Check whether the head alarm is due at `now`
    pub fn has_ready(&self, now: Jiffies) -> bool {
        match self.next_deadline() {
            Some(d) => !time_after(d, now),
            None => false,
        }
    }

    /// Fire every alarm due at the time of the call, in deadline order.
    ///
    /// Each alarm is removed before its callback runs so callbacks may
    /// reschedule it. Alarms scheduled by callbacks during this pass wait for
    /// the next pass. Returns the number of alarms fired.
    pub fn process(&mut self, ctx: &mut C) -> usize {
        let now = self.timer.jiffies();
        self.pass = self.pass.wrapping_add(1);

        let mut fired = 0;

        while let Some(id) = self.queue.first().copied() {
            let r = &self.registered[id.index()];

            let deadline = match r.state {
                AlarmState::Scheduled(d) => d,
                AlarmState::Idle => {
                    self.unlink(id);
                    continue;
                }
            };

            if time_after(deadline, now) || r.pass == self.pass {
                break;
            }

            let (callback, arg) = (r.callback, r.arg);

            self.registered[id.index()].state = AlarmState::Idle;
            self.unlink(id);

            trace!("Alarm {} fired at {} (deadline {})", id.0, now, deadline);

            (callback)(ctx, self, id, arg);
            fired += 1;
        }

        if fired > 0 {
            debug!("Processed {} alarms at {}", fired, now);
        }

        fired
    }

    fn registration(&mut self, id: AlarmId) -> Result<&mut Registration<T, C, N>, AlarmError> {
        self.registered.get_mut(id.index()).ok_or(AlarmError::Unknown(id))
    }

    fn deadline(&self, id: AlarmId) -> Option<Jiffies> {
        match self.registered.get(id.index()).map(|r| r.state) {
            Some(AlarmState::Scheduled(d)) => Some(d),
            _ => None,
        }
    }

    /// Insert into the ordered queue after every alarm not later than `deadline`
    fn link(&mut self, id: AlarmId, deadline: Jiffies) {
        // Queue length never exceeds the registration count
        if self.queue.push(id).is_err() {
            return;
        }

        let mut i = self.queue.len() - 1;
        while i > 0 {
            let prev = self.deadline(self.queue[i - 1]).unwrap_or(deadline);
            if !time_after(prev, deadline) {
                break;
            }
            self.queue.swap(i - 1, i);
            i -= 1;
        }
    }

    fn unlink(&mut self, id: AlarmId) {
        let pos = match self.queue.iter().position(|q| *q == id) {
            Some(p) => p,
            None => return,
        };

        for i in pos..self.queue.len() - 1 {
            self.queue.swap(i, i + 1);
        }
        let _ = self.queue.pop();
    }
}

impl <CS, T, C, const N: usize> Shared<CS, Alarms<T, C, N>>
where
    CS: CriticalSection,
    T: Timer,
{
    /// Interrupt half of the threaded configuration: raise `flag` when the
    /// head alarm is due.
    pub fn signal_ready(&self, flag: &PendingFlag) -> bool {
        let ready = self.lock(|a| a.has_ready(a.now())).unwrap_or(false);
        if ready {
            flag.raise();
        }
        ready
    }

    /// Worker half of the threaded configuration: process alarms if the
    /// interrupt flagged pending work.
    pub fn run_pending(&self, flag: &PendingFlag, ctx: &mut C) -> usize {
        if !flag.take() {
            return 0;
        }
        self.lock(|a| a.process(ctx)).unwrap_or(0)
    }
}
