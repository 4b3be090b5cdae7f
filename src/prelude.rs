//! WSN MAC crate prelude

pub use crate::timer::{Timer as MacTimer, Jiffies};

pub use crate::alarm::{Alarms, AlarmId, AlarmError};

pub use crate::address::Address;

pub use crate::header::{HeaderInfo, HeaderError, InfoFlags};

pub use crate::error::{MacError, NetError, TxFailure};

pub use crate::radio::{Radio, HalRadio, HalError};

pub use crate::mac::{Mac, MacConfig, MacEvent, Protocol, ProtocolKind};

pub use crate::net::{Forwarder, ForwarderConfig, Forwarded, Dropped, PORT_ANY};

pub use crate::node::Node;
