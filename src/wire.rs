use num_enum::TryFromPrimitive;

/// Magic announcing the versioned handshake layout (V2 and later).
pub const PROTO_MAGIC: u32 = 0x45726963;

/// Magic of the legacy V1 handshake, overlaid on the destination node id
///  field of the embedded network-message header.
pub const LEGACY_MAGIC: u32 = 0xeebc0ded;

/// Sentinel cookie sent on otherwise idle ACK connections to keep them warm.
///  Carries no buffer-release information.
pub const KEEPALIVE_PING: u64 = 1;

/// Upper bound for the interface address list in a handshake.
pub const MAX_INTERFACES: usize = 16;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ProtocolVersion {
    V1,
    V2,
    V3,
}

impl ProtocolVersion {
    pub fn wire_version(self) -> (u16, u16) {
        match self {
            ProtocolVersion::V1 => (1, 0),
            ProtocolVersion::V2 => (2, 0),
            ProtocolVersion::V3 => (3, 0),
        }
    }

    pub fn from_wire(major: u16, minor: u16) -> Option<ProtocolVersion> {
        match (major, minor) {
            (1, 0) => Some(ProtocolVersion::V1),
            (2, 0) => Some(ProtocolVersion::V2),
            (3, 0) => Some(ProtocolVersion::V3),
            _ => None,
        }
    }

    /// The magic a handshake of this version carries on the wire.
    pub fn magic(self) -> u32 {
        match self {
            ProtocolVersion::V1 => LEGACY_MAGIC,
            ProtocolVersion::V2 | ProtocolVersion::V3 => PROTO_MAGIC,
        }
    }
}

/// Type of a framed message. V1 connections have no AckOnly representation,
///  every V1 frame is Data.
#[derive(Copy, Clone, Eq, PartialEq, Debug, TryFromPrimitive)]
#[repr(u32)]
pub enum MsgType {
    AckOnly = 0xC0,
    Data = 0xC1,
}

/// Kind of the network-layer message embedded in a Data frame. Only `Hello`
///  is interpreted by this crate (and only during the V1 handshake), the
///  rest is passed through to the layer above.
#[derive(Copy, Clone, Eq, PartialEq, Debug, TryFromPrimitive)]
#[repr(u32)]
pub enum NetMsgKind {
    Ack = 0,
    Put = 1,
    Get = 2,
    Reply = 3,
    Hello = 4,
}

/// Traffic class a connection was established for, exchanged in the
///  handshake and consulted by the `match_tx` policy.
#[derive(Copy, Clone, Eq, PartialEq, Debug, TryFromPrimitive)]
#[repr(u32)]
pub enum ConnClass {
    Any = 0,
    Control = 1,
    BulkIn = 2,
    BulkOut = 3,
    /// Dedicated to flowing acknowledgments back towards a sender, e.g. to
    ///  a router. Eligible for multi-cookie coalescing on V3 connections.
    Ack = 4,
}
