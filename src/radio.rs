//! Radio driver interface
//
// Narrow interface consumed by the MAC protocols, with an adapter over the
// `radio` crate traits for real devices.

use core::fmt::Debug;

use log::{trace, error};

use radio::{Busy, Channel, Power, Receive, Rssi, State, Transmit, RadioState};

use crate::MAX_FRAME_LEN;

/// Radio driver as seen by the MAC
pub trait Radio {
    type Error: Debug;

    /// Power up and enter receive mode
    fn on(&mut self) -> Result<(), Self::Error>;

    /// Enter low-power sleep
    fn off(&mut self) -> Result<(), Self::Error>;

    fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error>;

    fn set_tx_power(&mut self, power: i8) -> Result<(), Self::Error>;

    /// Start transmission of a header followed by its payload
    fn send(&mut self, header: &[u8], data: &[u8]) -> Result<(), Self::Error>;

    /// Clear channel assessment
    fn is_channel_clear(&mut self) -> Result<bool, Self::Error>;

    /// Fetch a received frame if one is available
    fn receive(&mut self, buff: &mut [u8]) -> Result<Option<usize>, Self::Error>;
}

/// Errors from the [`HalRadio`] adapter
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalError<E> {
    /// Frame of this length does not fit the transmit buffer
    FrameTooLong(usize),
    /// Underlying device error
    Hal(E),
}

/// Adapter implementing [`Radio`] over `radio` crate devices
pub struct HalRadio<T> {
    hal: T,
    /// RSSI threshold above which the channel is considered busy
    channel_clear_threshold: i16,
    buff: [u8; MAX_FRAME_LEN],
}

impl <T> HalRadio<T> {
    pub fn new(hal: T, channel_clear_threshold: i16) -> Self {
        Self {
            hal,
            channel_clear_threshold,
            buff: [0u8; MAX_FRAME_LEN],
        }
    }

    pub fn inner(&mut self) -> &mut T {
        &mut self.hal
    }
}

impl <T, E> Radio for HalRadio<T>
where
    T: Transmit<Error=E> + Receive<Error=E> + Rssi<Error=E> + State<Error=E> + Busy<Error=E> + Channel<Error=E> + Power<Error=E>,
    <T as Channel>::Channel: From<u8>,
    E: Debug,
{
    type Error = HalError<E>;

    fn on(&mut self) -> Result<(), Self::Error> {
        self.hal.start_receive().map_err(HalError::Hal)
    }

    fn off(&mut self) -> Result<(), Self::Error> {
        self.hal.set_state(<T as State>::State::sleep()).map_err(HalError::Hal)
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error> {
        let ch = <T as Channel>::Channel::from(channel);
        self.hal.set_channel(&ch).map_err(HalError::Hal)
    }

    fn set_tx_power(&mut self, power: i8) -> Result<(), Self::Error> {
        self.hal.set_power(power).map_err(HalError::Hal)
    }

    fn send(&mut self, header: &[u8], data: &[u8]) -> Result<(), Self::Error> {
        let n = header.len() + data.len();
        if n > self.buff.len() {
            error!("Frame of {} bytes exceeds radio buffer, not sent", n);
            return Err(HalError::FrameTooLong(n));
        }

        self.buff[..header.len()].copy_from_slice(header);
        self.buff[header.len()..n].copy_from_slice(data);

        trace!("Radio TX ({} bytes): {:?}", n, &self.buff[..n]);

        self.hal.start_transmit(&self.buff[..n]).map_err(HalError::Hal)
    }

    fn is_channel_clear(&mut self) -> Result<bool, Self::Error> {
        if self.hal.is_busy().map_err(HalError::Hal)? {
            return Ok(false);
        }

        let rssi = self.hal.poll_rssi().map_err(HalError::Hal)?;

        Ok(rssi <= self.channel_clear_threshold)
    }

    fn receive(&mut self, buff: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        if !self.hal.check_receive(true).map_err(HalError::Hal)? {
            return Ok(None);
        }

        let (n, _info) = self.hal.get_received(buff).map_err(HalError::Hal)?;

        Ok(Some(n))
    }
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    #[derive(Debug, Clone, PartialEq)]
    pub enum MockError {
        Rejected,
    }

    #[derive(Debug, Default)]
    struct Inner {
        on: bool,
        channel: u8,
        power: i8,
        sent: Vec<Vec<u8>>,
        cca: VecDeque<bool>,
        busy: bool,
        reject: bool,
        rx_fault: bool,
        rx: VecDeque<Vec<u8>>,
    }

    /// Mock radio recording transmitted frames, with scripted channel
    /// assessment and injected receive frames
    #[derive(Clone, Debug, Default)]
    pub struct MockRadio(Arc<Mutex<Inner>>);

    impl MockRadio {
        pub fn new() -> Self {
            Self::default()
        }

        /// Frames transmitted so far
        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.0.lock().unwrap().sent.clone()
        }

        pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
            core::mem::take(&mut self.0.lock().unwrap().sent)
        }

        /// Queue channel assessment results, consumed before `set_busy`
        pub fn push_cca(&mut self, results: &[bool]) {
            self.0.lock().unwrap().cca.extend(results.iter().copied());
        }

        pub fn set_busy(&mut self, busy: bool) {
            self.0.lock().unwrap().busy = busy;
        }

        /// Fail subsequent transmissions
        pub fn set_reject(&mut self, reject: bool) {
            self.0.lock().unwrap().reject = reject;
        }

        /// Fail subsequent receive checks
        pub fn set_rx_fault(&mut self, fault: bool) {
            self.0.lock().unwrap().rx_fault = fault;
        }

        pub fn inject(&mut self, frame: &[u8]) {
            self.0.lock().unwrap().rx.push_back(frame.to_vec());
        }

        pub fn is_on(&self) -> bool {
            self.0.lock().unwrap().on
        }

        pub fn channel(&self) -> u8 {
            self.0.lock().unwrap().channel
        }

        pub fn power(&self) -> i8 {
            self.0.lock().unwrap().power
        }
    }

    impl super::Radio for MockRadio {
        type Error = MockError;

        fn on(&mut self) -> Result<(), MockError> {
            self.0.lock().unwrap().on = true;
            Ok(())
        }

        fn off(&mut self) -> Result<(), MockError> {
            self.0.lock().unwrap().on = false;
            Ok(())
        }

        fn set_channel(&mut self, channel: u8) -> Result<(), MockError> {
            self.0.lock().unwrap().channel = channel;
            Ok(())
        }

        fn set_tx_power(&mut self, power: i8) -> Result<(), MockError> {
            self.0.lock().unwrap().power = power;
            Ok(())
        }

        fn send(&mut self, header: &[u8], data: &[u8]) -> Result<(), MockError> {
            let mut i = self.0.lock().unwrap();
            if i.reject {
                return Err(MockError::Rejected);
            }

            let mut frame = header.to_vec();
            frame.extend_from_slice(data);
            i.sent.push(frame);

            Ok(())
        }

        fn is_channel_clear(&mut self) -> Result<bool, MockError> {
            let mut i = self.0.lock().unwrap();
            match i.cca.pop_front() {
                Some(clear) => Ok(clear),
                None => Ok(!i.busy),
            }
        }

        fn receive(&mut self, buff: &mut [u8]) -> Result<Option<usize>, MockError> {
            let mut i = self.0.lock().unwrap();
            if i.rx_fault {
                return Err(MockError::Rejected);
            }

            match i.rx.pop_front() {
                Some(f) => {
                    buff[..f.len()].copy_from_slice(&f);
                    Ok(Some(f.len()))
                },
                None => Ok(None),
            }
        }
    }
}
