
use crate::address::Address;

/// Configuration shared by the MAC protocols
#[derive(Clone, PartialEq, Debug)]
pub struct MacConfig {
    /// Local node address
    pub address: Address,

    /// Size of the protocol send / receive buffer in bytes
    pub buffer_size: usize,

    /// Timeout for message ACK (if required) in milliseconds
    pub ack_timeout_ms: u32,

    /// Number of attempts for a single acknowledged unicast packet
    pub max_attempts: u8,

    /// Backoff between attempts in milliseconds, multiplied by the attempt index
    pub retry_timeout_ms: u32,

    /// Upper bound of the random backoff before channel assessment
    pub max_initial_backoff_ms: u32,

    /// Busy channel assessments tolerated before transmitting regardless
    pub max_cca_retries: u8,

    /// Request acknowledgements for unicast packets sent with `send`
    pub ack_unicast: bool,

    /// Accept long (8 byte) addresses
    pub long_addresses: bool,

    /// TDMA slot length in milliseconds
    pub slot_time_ms: u32,

    /// TDMA slots per frame
    pub slots_per_frame: u16,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            address: Address::UNSPECIFIED,

            buffer_size: crate::MAX_FRAME_LEN,
            ack_timeout_ms: 200,
            max_attempts: 3,
            retry_timeout_ms: 100,
            max_initial_backoff_ms: 30,
            max_cca_retries: 4,
            ack_unicast: true,

            long_addresses: true,

            slot_time_ms: 10,
            slots_per_frame: 10,
        }
    }
}

impl MacConfig {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    /// Backoff before retry `attempt` (1-based)
    pub fn retry_backoff_ms(&self, attempt: u8) -> u32 {
        self.retry_timeout_ms.saturating_mul(attempt as u32)
    }

    /// TDMA slot length in milliseconds, at least 1
    pub fn slot_len_ms(&self) -> u32 {
        self.slot_time_ms.max(1)
    }

    /// TDMA frame length in milliseconds, saturating at `u32::MAX`
    pub fn frame_time_ms(&self) -> u32 {
        self.slot_len_ms().saturating_mul(self.slots_per_frame.max(1) as u32)
    }

    /// TDMA slot owned by this node
    pub fn own_slot(&self) -> u16 {
        let n = match self.address {
            Address::Short(s) => s,
            Address::Long(l) => u16::from_le_bytes([l[0], l[1]]),
        };
        n % self.slots_per_frame.max(1)
    }
}
