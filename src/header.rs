//! MAC header codec
//
// Frame layout (version 1):
//
// +-----+---------+----------------------------+---------+
// | FCF | FCF-EXT | FCF-specified fields       | payload |
// +-----+---------+----------------------------+---------+
//
// FCF bits 0..2 carry the original address combination code
// (source: none 0, short 1, long 2) + (destination: none 0, short 3, long 6).
// Long source with long destination does not fit and is rejected.
// FCF bits 3..7: immediate source, immediate destination, sequence number,
// cost, extended flags byte present.
// FCF-EXT bits 0..1 carry the authentication type, bits 2..7: source port,
// destination port, hop limit, more data, is-ack, ack requested.
//
// Fields follow in fixed order: original source, original destination,
// immediate source, immediate destination, sequence number, cost,
// source port, destination port, hop limit. Short addresses are little
// endian, absent fields take no space.

use byteorder::{ByteOrder, LittleEndian};

use crate::address::{Address, LONG_ADDR_LEN, SHORT_ADDR_LEN};
use crate::timer::Jiffies;

/// Worst case encoded header length
pub const MAX_HEADER_LEN: usize = 2 + LONG_ADDR_LEN + SHORT_ADDR_LEN + 2 * SHORT_ADDR_LEN + 5;

/// Mask of the address combination code in the FCF byte
pub const FCF_ADDR_MASK: u8 = 0b0000_0111;

const SRC_SHORT: u8 = 1;
const SRC_LONG: u8 = 2;
const DST_SHORT: u8 = 3;
const DST_LONG: u8 = 6;

bitflags::bitflags! {
    /// Frame control flags (excluding the address combination code)
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Fcf: u8 {
        const IMMED_SRC = 0x08;
        const IMMED_DST = 0x10;
        const SEQNUM    = 0x20;
        const COST      = 0x40;
        const EXTENDED  = 0x80;
    }
}

/// Mask of the authentication type in the FCF-EXT byte
pub const FCF_EXT_AUTH_MASK: u8 = 0b0000_0011;

bitflags::bitflags! {
    /// Extended frame control flags (excluding the authentication type)
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct FcfExt: u8 {
        const SRC_PORT    = 0x04;
        const DST_PORT    = 0x08;
        const HOP_LIMIT   = 0x10;
        const MORE_DATA   = 0x20;
        const IS_ACK      = 0x40;
        const ACK_REQUEST = 0x80;
    }
}

bitflags::bitflags! {
    /// Per-packet descriptor flags
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct InfoFlags: u8 {
        /// Originated on this node (not carried on air)
        const LOCAL         = 0x01;
        const MORE_DATA     = 0x02;
        const ACK_REQUESTED = 0x04;
        const IS_ACK        = 0x08;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, strum::FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AuthType {
    None = 0,
    Type1 = 1,
    Type2 = 2,
    Type3 = 3,
}

impl Default for AuthType {
    fn default() -> Self {
        AuthType::None
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaderError {
    /// Buffer shorter than its flags require
    Truncated,
    /// Output buffer cannot hold the encoded header
    BufferTooSmall,
    /// Long source together with long destination
    InvalidAddressCombination,
    /// Immediate addresses are short only
    LongImmediateAddress,
}

/// Transient per-packet header descriptor
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeaderInfo {
    /// End-to-end source, unspecified when omitted
    pub original_src: Address,
    /// End-to-end destination, broadcast when omitted
    pub original_dst: Address,
    /// Previous radio hop, unspecified when omitted
    pub immed_src: Address,
    /// Next radio hop, unspecified when omitted
    pub immed_dst: Address,

    pub src_port: u8,
    pub dst_port: u8,
    pub seq: u8,
    pub cost: u8,
    pub hop_limit: u8,
    pub auth: AuthType,

    pub flags: InfoFlags,

    /// Length of the encoded header, set when built or parsed
    pub header_len: usize,
    /// Absolute time before which the packet should not be sent
    pub send_at: Jiffies,
}

impl Default for HeaderInfo {
    fn default() -> Self {
        Self {
            original_src: Address::UNSPECIFIED,
            original_dst: Address::BROADCAST,
            immed_src: Address::UNSPECIFIED,
            immed_dst: Address::UNSPECIFIED,
            src_port: 0,
            dst_port: 0,
            seq: 0,
            cost: 0,
            hop_limit: 0,
            auth: AuthType::None,
            flags: InfoFlags::empty(),
            header_len: 0,
            send_at: 0,
        }
    }
}

impl HeaderInfo {
    /// Descriptor for a packet to `dst`
    pub fn new(dst: Address) -> Self {
        Self {
            original_dst: dst,
            ..Default::default()
        }
    }

    /// Immediate destination if set, otherwise the original destination.
    ///
    /// A long immediate address is never unspecified, so the fallback only
    /// applies to the zero short address regardless of address width.
    pub fn next_hop(&self) -> Address {
        self.immed_dst.or(self.original_dst)
    }

    /// Immediate source if set, otherwise the original source
    pub fn prev_hop(&self) -> Address {
        self.immed_src.or(self.original_src)
    }

    pub fn is_local(&self) -> bool {
        self.flags.contains(InfoFlags::LOCAL)
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(InfoFlags::IS_ACK)
    }

    pub fn ack_requested(&self) -> bool {
        self.flags.contains(InfoFlags::ACK_REQUESTED)
    }

    /// Exchange source and destination in place
    pub fn invert_direction(&mut self) {
        core::mem::swap(&mut self.original_src, &mut self.original_dst);
        core::mem::swap(&mut self.immed_src, &mut self.immed_dst);
        core::mem::swap(&mut self.src_port, &mut self.dst_port);
    }

    fn address_code(&self) -> Result<u8, HeaderError> {
        let src = match self.original_src {
            a if a.is_unspecified() => 0,
            Address::Short(_) => SRC_SHORT,
            Address::Long(_) => SRC_LONG,
        };

        let dst = match self.original_dst {
            Address::BROADCAST => 0,
            Address::Short(_) => DST_SHORT,
            Address::Long(_) => DST_LONG,
        };

        if src == SRC_LONG && dst == DST_LONG {
            return Err(HeaderError::InvalidAddressCombination);
        }

        Ok(src + dst)
    }

    fn control(&self) -> Result<(u8, u8), HeaderError> {
        if self.immed_src.is_long() || self.immed_dst.is_long() {
            return Err(HeaderError::LongImmediateAddress);
        }

        let mut fcf = Fcf::empty();
        fcf.set(Fcf::IMMED_SRC, !self.immed_src.is_unspecified());
        fcf.set(Fcf::IMMED_DST, !self.immed_dst.is_unspecified());
        fcf.set(Fcf::SEQNUM, self.seq != 0);
        fcf.set(Fcf::COST, self.cost != 0);

        let mut ext = FcfExt::empty();
        ext.set(FcfExt::SRC_PORT, self.src_port != 0);
        ext.set(FcfExt::DST_PORT, self.dst_port != 0);
        ext.set(FcfExt::HOP_LIMIT, self.hop_limit != 0);
        ext.set(FcfExt::MORE_DATA, self.flags.contains(InfoFlags::MORE_DATA));
        ext.set(FcfExt::IS_ACK, self.flags.contains(InfoFlags::IS_ACK));
        ext.set(FcfExt::ACK_REQUEST, self.flags.contains(InfoFlags::ACK_REQUESTED));

        let ext = ext.bits() | self.auth as u8;
        if ext != 0 {
            fcf |= Fcf::EXTENDED;
        }

        Ok((fcf.bits() | self.address_code()?, ext))
    }

    /// Length of the encoded header
    pub fn encoded_len(&self) -> Result<usize, HeaderError> {
        let (fcf, _ext) = self.control()?;
        let flags = Fcf::from_bits_truncate(fcf);

        let mut n = 1;
        if flags.contains(Fcf::EXTENDED) {
            n += 1;
        }
        if !self.original_src.is_unspecified() {
            n += self.original_src.encoded_len();
        }
        if self.original_dst != Address::BROADCAST {
            n += self.original_dst.encoded_len();
        }
        for f in &[Fcf::IMMED_SRC, Fcf::IMMED_DST] {
            if flags.contains(*f) {
                n += SHORT_ADDR_LEN;
            }
        }
        n += [self.seq, self.cost, self.src_port, self.dst_port, self.hop_limit]
            .iter()
            .filter(|v| **v != 0)
            .count();

        Ok(n)
    }

    /// Encode the header into `buf`, returning the encoded length
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, HeaderError> {
        let (fcf, ext) = self.control()?;
        let n = self.encoded_len()?;
        if buf.len() < n {
            return Err(HeaderError::BufferTooSmall);
        }

        let mut w = Writer{ buf, offset: 0 };

        w.u8(fcf);
        if ext != 0 {
            w.u8(ext);
        }

        if !self.original_src.is_unspecified() {
            w.addr(&self.original_src);
        }
        if self.original_dst != Address::BROADCAST {
            w.addr(&self.original_dst);
        }
        if !self.immed_src.is_unspecified() {
            w.addr(&self.immed_src);
        }
        if !self.immed_dst.is_unspecified() {
            w.addr(&self.immed_dst);
        }

        for v in &[self.seq, self.cost, self.src_port, self.dst_port, self.hop_limit] {
            if *v != 0 {
                w.u8(*v);
            }
        }

        Ok(w.offset)
    }

    /// Decode a header from the front of `buf`, returning the descriptor
    /// and the header length
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), HeaderError> {
        let mut r = Reader{ buf, offset: 0 };

        let raw = r.u8()?;
        let fcf = Fcf::from_bits_truncate(raw);

        let (src, dst) = match raw & FCF_ADDR_MASK {
            0 => (0, 0),
            1 => (SRC_SHORT, 0),
            2 => (SRC_LONG, 0),
            3 => (0, DST_SHORT),
            4 => (SRC_SHORT, DST_SHORT),
            5 => (SRC_LONG, DST_SHORT),
            6 => (0, DST_LONG),
            _ => (SRC_SHORT, DST_LONG),
        };

        let raw_ext = match fcf.contains(Fcf::EXTENDED) {
            true => r.u8()?,
            false => 0,
        };
        let ext = FcfExt::from_bits_truncate(raw_ext);

        let mut info = HeaderInfo::default();

        info.original_src = match src {
            SRC_SHORT => r.short()?,
            SRC_LONG => r.long()?,
            _ => Address::UNSPECIFIED,
        };
        info.original_dst = match dst {
            DST_SHORT => r.short()?,
            DST_LONG => r.long()?,
            _ => Address::BROADCAST,
        };
        if fcf.contains(Fcf::IMMED_SRC) {
            info.immed_src = r.short()?;
        }
        if fcf.contains(Fcf::IMMED_DST) {
            info.immed_dst = r.short()?;
        }

        info.seq = r.u8_if(fcf.contains(Fcf::SEQNUM))?;
        info.cost = r.u8_if(fcf.contains(Fcf::COST))?;
        info.src_port = r.u8_if(ext.contains(FcfExt::SRC_PORT))?;
        info.dst_port = r.u8_if(ext.contains(FcfExt::DST_PORT))?;
        info.hop_limit = r.u8_if(ext.contains(FcfExt::HOP_LIMIT))?;

        info.auth = AuthType::from_repr(raw_ext & FCF_EXT_AUTH_MASK).unwrap_or_default();

        info.flags.set(InfoFlags::MORE_DATA, ext.contains(FcfExt::MORE_DATA));
        info.flags.set(InfoFlags::IS_ACK, ext.contains(FcfExt::IS_ACK));
        info.flags.set(InfoFlags::ACK_REQUESTED, ext.contains(FcfExt::ACK_REQUEST));

        info.header_len = r.offset;

        Ok((info, r.offset))
    }
}

/// Fetch the sequence number of an encoded frame
pub fn peek_seq(buf: &[u8]) -> Option<u8> {
    HeaderInfo::decode(buf).ok().map(|(h, _n)| h.seq)
}

struct Writer<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl <'a> Writer<'a> {
    fn u8(&mut self, v: u8) {
        self.buf[self.offset] = v;
        self.offset += 1;
    }

    fn addr(&mut self, a: &Address) {
        match a {
            Address::Short(s) => {
                LittleEndian::write_u16(&mut self.buf[self.offset..], *s);
                self.offset += SHORT_ADDR_LEN;
            },
            Address::Long(l) => {
                self.buf[self.offset..self.offset + LONG_ADDR_LEN].copy_from_slice(l);
                self.offset += LONG_ADDR_LEN;
            },
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl <'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], HeaderError> {
        if self.buf.len() < self.offset + n {
            return Err(HeaderError::Truncated);
        }
        let d = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(d)
    }

    fn u8(&mut self) -> Result<u8, HeaderError> {
        Ok(self.take(1)?[0])
    }

    fn u8_if(&mut self, present: bool) -> Result<u8, HeaderError> {
        match present {
            true => self.u8(),
            false => Ok(0),
        }
    }

    fn short(&mut self) -> Result<Address, HeaderError> {
        let d = self.take(SHORT_ADDR_LEN)?;
        Ok(Address::Short(LittleEndian::read_u16(d)))
    }

    fn long(&mut self) -> Result<Address, HeaderError> {
        let d = self.take(LONG_ADDR_LEN)?;
        let mut l = [0u8; LONG_ADDR_LEN];
        l.copy_from_slice(d);
        Ok(Address::Long(l))
    }
}
