
use crate::header::HeaderError;

/// MAC errors, returned synchronously to the caller
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacError<E> {
    /// Outbound queue full, the packet was not accepted
    QueueFull,

    /// Header plus payload exceed the configured buffer size
    PayloadTooLong,

    /// Address not usable with this configuration
    InvalidAddress,

    /// Header encoding / decoding error
    Header(HeaderError),

    /// Wrapper for unhandled / underlying radio errors
    Radio(E),
}

impl <E> From<HeaderError> for MacError<E> {
    fn from(e: HeaderError) -> Self {
        MacError::Header(e)
    }
}

/// Reason reported for a send that was accepted but not delivered
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxFailure {
    /// No acknowledgement after the maximum number of attempts
    AckTimeout,

    /// The radio rejected the transmission
    Radio,
}

/// Networking layer errors
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetError {
    /// No free slot for another port receiver
    ReceiverTableFull,
}
