use crate::record::ResponseCode;

bitflags::bitflags! {
    /// Header flag bits, excluding the opcode and rcode fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HeaderFlags: u16 {
        /// Query or response
        const QR = 1 << 15;
        /// Authoritative answer
        const AA = 1 << 10;
        /// Truncated
        const TC = 1 << 9;
        /// Recursion desired
        const RD = 1 << 8;
        /// Recursion available
        const RA = 1 << 7;
        /// Authentic data
        const AD = 1 << 5;
        /// Checking disabled
        const CD = 1 << 4;
    }
}

/// Immutable view of the 12-byte DNS header, captured when the query
/// arrives. This is a snapshot, not a parser: the rest of the message is
/// owned by the resolver's own representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderSnapshot {
    /// Transaction id
    pub id: u16,
    /// Opcode, kept raw
    pub opcode: u8,
    /// Flag bits
    pub flags: HeaderFlags,
    /// Response code, kept raw (extended rcodes live in EDNS)
    pub rcode: u8,
    /// Section counts as they appeared on the wire
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl HeaderSnapshot {
    pub const WIRE_LEN: usize = 12;

    /// Capture a snapshot from the leading header bytes of a message.
    pub fn from_wire(data: &[u8]) -> anyhow::Result<Self> {
        if data.len() < Self::WIRE_LEN {
            anyhow::bail!("truncated DNS header: {} bytes", data.len());
        }

        let word = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);
        let bits = word(2);

        Ok(Self {
            id: word(0),
            opcode: ((bits >> 11) & 0xF) as u8,
            flags: HeaderFlags::from_bits_truncate(bits),
            rcode: (bits & 0xF) as u8,
            qdcount: word(4),
            ancount: word(6),
            nscount: word(8),
            arcount: word(10),
        })
    }

    /// The rcode as a typed value, when it maps to a known code.
    pub fn response_code(&self) -> Option<ResponseCode> {
        ResponseCode::try_from(self.rcode as u16).ok()
    }

    pub fn is_response(&self) -> bool {
        self.flags.contains(HeaderFlags::QR)
    }
}
