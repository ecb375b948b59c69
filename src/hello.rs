use bytes::{BufMut, BytesMut};
use std::time::Duration;
use tracing::debug;

use crate::buf::ScalarReader;
use crate::config::HelloTestHook;
use crate::error::ProtocolError;
use crate::sock::WireSocket;
use crate::wire::{ConnClass, NetMsgKind, ProtocolVersion, LEGACY_MAGIC, MAX_INTERFACES, PROTO_MAGIC};

/// The handshake message opening every connection. Created once per
///  connection attempt and consumed immediately on receipt.
///
/// V1 peers exchange it as a legacy network-message header whose first eight
///  bytes (the destination node id) are overlaid with magic and version, so
///  a single probe distinguishes the dialects before the version is known.
///  The V1 rendition carries neither a destination node id nor incarnations;
///  those decode as zero.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct HelloMessage {
    pub src_node: u64,
    pub dst_node: u64,
    pub src_process: u32,
    pub dst_process: u32,
    pub src_incarnation: u64,
    pub dst_incarnation: u64,
    pub conn_class: ConnClass,
    pub interfaces: Vec<u32>,
}

/// magic + version, shared by both layouts
const PROBE_LEN: usize = 2 * size_of::<u32>();

/// full fixed part of the legacy V1 handshake frame
pub const V1_FIXED_LEN: usize = PROBE_LEN + size_of::<u64>() + 5 * size_of::<u32>();

/// fixed prefix of the V2/V3 handshake, up to but excluding the interface array
pub const V2_FIXED_LEN: usize = PROBE_LEN + 4 * size_of::<u64>() + 4 * size_of::<u32>();

fn fixed_prefix_len(version: ProtocolVersion) -> usize {
    match version {
        ProtocolVersion::V1 => V1_FIXED_LEN,
        ProtocolVersion::V2 | ProtocolVersion::V3 => V2_FIXED_LEN,
    }
}

pub fn encode_hello(hello: &HelloMessage, version: ProtocolVersion, buf: &mut BytesMut) {
    encode_hello_hooked(hello, version, None, buf)
}

/// The test hook mutates magic or minor version just before the actual
///  encode; the encode itself is identical for hooked and regular sends.
pub(crate) fn encode_hello_hooked(
    hello: &HelloMessage,
    version: ProtocolVersion,
    hook: Option<&HelloTestHook>,
    buf: &mut BytesMut,
) {
    assert!(hello.interfaces.len() <= MAX_INTERFACES);

    let mut magic = version.magic();
    let (major, mut minor) = version.wire_version();
    if let Some(hook) = hook {
        if hook.legacy_magic {
            magic = LEGACY_MAGIC;
        }
        if hook.bump_minor {
            minor += 1;
        }
        debug!("mutating outgoing handshake for compatibility testing: magic {:#010x}, version {}.{}", magic, major, minor);
    }

    buf.put_u32_le(magic);
    buf.put_u16_le(major);
    buf.put_u16_le(minor);

    match version {
        ProtocolVersion::V1 => {
            buf.put_u64_le(hello.src_node);
            buf.put_u32_le(hello.dst_process);
            buf.put_u32_le(hello.src_process);
            buf.put_u32_le(NetMsgKind::Hello as u32);
            buf.put_u32_le((hello.interfaces.len() * size_of::<u32>()) as u32);
            buf.put_u32_le(hello.conn_class as u32);
        }
        ProtocolVersion::V2 | ProtocolVersion::V3 => {
            buf.put_u64_le(hello.src_node);
            buf.put_u64_le(hello.dst_node);
            buf.put_u32_le(hello.src_process);
            buf.put_u32_le(hello.dst_process);
            buf.put_u64_le(hello.src_incarnation);
            buf.put_u64_le(hello.dst_incarnation);
            buf.put_u32_le(hello.conn_class as u32);
            buf.put_u32_le(hello.interfaces.len() as u32);
        }
    }

    for &addr in &hello.interfaces {
        buf.put_u32_le(addr);
    }
}

#[derive(Copy, Clone, Debug)]
struct Probe {
    flip: bool,
    legacy: bool,
}

fn probe_magic(buf: &mut impl bytes::Buf) -> Result<Probe, ProtocolError> {
    let raw = buf.try_get_u32_le()?;

    if raw == PROTO_MAGIC {
        Ok(Probe { flip: false, legacy: false })
    }
    else if raw.swap_bytes() == PROTO_MAGIC {
        Ok(Probe { flip: true, legacy: false })
    }
    else if raw == LEGACY_MAGIC {
        Ok(Probe { flip: false, legacy: true })
    }
    else if raw.swap_bytes() == LEGACY_MAGIC {
        Ok(Probe { flip: true, legacy: true })
    }
    else {
        Err(ProtocolError::BadMagic { magic: raw })
    }
}

fn read_version(probe: Probe, buf: &mut impl bytes::Buf) -> Result<ProtocolVersion, ProtocolError> {
    let r = ScalarReader { flip: probe.flip };
    let major = r.u16(buf)?;
    let minor = r.u16(buf)?;

    match ProtocolVersion::from_wire(major, minor) {
        Some(ProtocolVersion::V1) if probe.legacy => Ok(ProtocolVersion::V1),
        Some(v) if !probe.legacy && v != ProtocolVersion::V1 => Ok(v),
        _ => Err(ProtocolError::UnsupportedVersion { major, minor }),
    }
}

fn decode_body_v1(buf: &mut impl bytes::Buf, flip: bool) -> Result<(HelloMessage, usize), ProtocolError> {
    let r = ScalarReader { flip };

    let src_node = r.u64(buf)?;
    let dst_process = r.u32(buf)?;
    let src_process = r.u32(buf)?;
    let raw_kind = r.u32(buf)?;
    let payload_len = r.u32(buf)?;
    let raw_class = r.u32(buf)?;

    if raw_kind != NetMsgKind::Hello as u32 {
        return Err(ProtocolError::BadMessageType { kind: raw_kind });
    }
    if payload_len as usize % size_of::<u32>() != 0 {
        return Err(ProtocolError::Truncated);
    }
    let num_interfaces = payload_len as usize / size_of::<u32>();
    if num_interfaces > MAX_INTERFACES {
        return Err(ProtocolError::TooManyInterfaces { count: num_interfaces as u32 });
    }
    let conn_class = ConnClass::try_from(raw_class)
        .map_err(|_| ProtocolError::BadMessageType { kind: raw_class })?;

    let hello = HelloMessage {
        src_node,
        dst_node: 0,
        src_process,
        dst_process,
        src_incarnation: 0,
        dst_incarnation: 0,
        conn_class,
        interfaces: Vec::new(),
    };
    Ok((hello, num_interfaces))
}

fn decode_body_v2(buf: &mut impl bytes::Buf, flip: bool) -> Result<(HelloMessage, usize), ProtocolError> {
    let r = ScalarReader { flip };

    let src_node = r.u64(buf)?;
    let dst_node = r.u64(buf)?;
    let src_process = r.u32(buf)?;
    let dst_process = r.u32(buf)?;
    let src_incarnation = r.u64(buf)?;
    let dst_incarnation = r.u64(buf)?;
    let raw_class = r.u32(buf)?;
    let num_interfaces = r.u32(buf)?;

    if num_interfaces as usize > MAX_INTERFACES {
        return Err(ProtocolError::TooManyInterfaces { count: num_interfaces });
    }
    let conn_class = ConnClass::try_from(raw_class)
        .map_err(|_| ProtocolError::BadMessageType { kind: raw_class })?;

    let hello = HelloMessage {
        src_node,
        dst_node,
        src_process,
        dst_process,
        src_incarnation,
        dst_incarnation,
        conn_class,
        interfaces: Vec::new(),
    };
    Ok((hello, num_interfaces as usize))
}

fn decode_interfaces(buf: &mut impl bytes::Buf, flip: bool, count: usize) -> Result<Vec<u32>, ProtocolError> {
    let r = ScalarReader { flip };

    let mut interfaces = Vec::with_capacity(count);
    for index in 0..count {
        let addr = r.u32(buf)?;
        if addr == 0 {
            return Err(ProtocolError::ZeroInterfaceAddress { index });
        }
        interfaces.push(addr);
    }
    Ok(interfaces)
}

/// Decodes a complete handshake frame, returning the message, the version
///  the peer speaks, and whether the peer's byte order is flipped relative
///  to ours.
pub fn decode_hello(frame: &[u8]) -> Result<(HelloMessage, ProtocolVersion, bool), ProtocolError> {
    let mut buf = frame;

    let probe = probe_magic(&mut buf)?;
    let version = read_version(probe, &mut buf)?;

    let (mut hello, num_interfaces) = match version {
        ProtocolVersion::V1 => decode_body_v1(&mut buf, probe.flip)?,
        ProtocolVersion::V2 | ProtocolVersion::V3 => decode_body_v2(&mut buf, probe.flip)?,
    };
    hello.interfaces = decode_interfaces(&mut buf, probe.flip, num_interfaces)?;

    Ok((hello, version, probe.flip))
}

/// Writes a handshake: the fixed part first, then the interface array as a
///  second, separately-sized write.
pub fn send_hello(
    sock: &dyn WireSocket,
    hello: &HelloMessage,
    version: ProtocolVersion,
    hook: Option<HelloTestHook>,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let mut buf = BytesMut::new();
    encode_hello_hooked(hello, version, hook.as_ref(), &mut buf);

    let fixed_len = fixed_prefix_len(version);
    sock.write_all(&buf[..fixed_len], timeout)?;
    if buf.len() > fixed_len {
        sock.write_all(&buf[fixed_len..], timeout)?;
    }
    Ok(())
}

/// Reads the version-specific remainder of a handshake, after magic and
///  version have been probed: the rest of the fixed part, then the
///  interface array as its own read.
pub(crate) fn read_hello_body(
    sock: &dyn WireSocket,
    version: ProtocolVersion,
    flip: bool,
    timeout: Duration,
) -> Result<HelloMessage, ProtocolError> {
    let mut body = vec![0u8; fixed_prefix_len(version) - PROBE_LEN];
    sock.read_exact(&mut body, timeout)?;
    let mut buf: &[u8] = &body;
    let (mut hello, num_interfaces) = match version {
        ProtocolVersion::V1 => decode_body_v1(&mut buf, flip)?,
        ProtocolVersion::V2 | ProtocolVersion::V3 => decode_body_v2(&mut buf, flip)?,
    };

    let mut interface_bytes = vec![0u8; num_interfaces * size_of::<u32>()];
    sock.read_exact(&mut interface_bytes, timeout)?;
    let mut buf: &[u8] = &interface_bytes;
    hello.interfaces = decode_interfaces(&mut buf, flip, num_interfaces)?;

    Ok(hello)
}

/// Reads a handshake from the socket: magic and version first to pick the
///  dialect, then the dialect's own body reader.
pub fn recv_hello(
    sock: &dyn WireSocket,
    timeout: Duration,
) -> Result<(HelloMessage, ProtocolVersion, bool), ProtocolError> {
    let mut probe_bytes = [0u8; PROBE_LEN];
    sock.read_exact(&mut probe_bytes, timeout)?;

    let mut buf: &[u8] = &probe_bytes;
    let probe = probe_magic(&mut buf)?;
    let version = read_version(probe, &mut buf)?;

    let hello = crate::protocol::for_version(version)
        .recv_hello_body(sock, probe.flip, timeout)?;

    Ok((hello, version, probe.flip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sock::test_socket::ScriptedSocket;
    use rstest::rstest;

    fn sample_hello(interfaces: Vec<u32>) -> HelloMessage {
        HelloMessage {
            src_node: 0x0102030405060708,
            dst_node: 0x1112131415161718,
            src_process: 3,
            dst_process: 4,
            src_incarnation: 0x2122232425262728,
            dst_incarnation: 0x3132333435363738,
            conn_class: ConnClass::BulkOut,
            interfaces,
        }
    }

    /// what a V1 peer reconstructs: no destination node id, no incarnations
    fn v1_normalized(mut hello: HelloMessage) -> HelloMessage {
        hello.dst_node = 0;
        hello.src_incarnation = 0;
        hello.dst_incarnation = 0;
        hello
    }

    #[rstest]
    #[case::v1_no_interfaces(ProtocolVersion::V1, vec![])]
    #[case::v1_interfaces(ProtocolVersion::V1, vec![0x0a000001, 0x0a000002])]
    #[case::v2(ProtocolVersion::V2, vec![0x0a000001])]
    #[case::v3(ProtocolVersion::V3, vec![0x0a000001, 0x0a000002, 0x0a000003])]
    #[case::v3_no_interfaces(ProtocolVersion::V3, vec![])]
    fn test_round_trip(#[case] version: ProtocolVersion, #[case] interfaces: Vec<u32>) {
        let hello = sample_hello(interfaces);

        let mut buf = BytesMut::new();
        encode_hello(&hello, version, &mut buf);

        let (decoded, decoded_version, flip) = decode_hello(&buf).unwrap();
        assert_eq!(decoded_version, version);
        assert!(!flip);

        let expected = match version {
            ProtocolVersion::V1 => v1_normalized(hello),
            _ => hello,
        };
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_encode_v2_explicit_bytes() {
        let hello = HelloMessage {
            src_node: 1,
            dst_node: 2,
            src_process: 3,
            dst_process: 4,
            src_incarnation: 5,
            dst_incarnation: 6,
            conn_class: ConnClass::Control,
            interfaces: vec![0x01020304],
        };

        let mut buf = BytesMut::new();
        encode_hello(&hello, ProtocolVersion::V2, &mut buf);

        assert_eq!(
            buf.as_ref(),
            &[
                0x63, 0x69, 0x72, 0x45, // magic
                2, 0, 0, 0,             // version 2.0
                1, 0, 0, 0, 0, 0, 0, 0, // src node
                2, 0, 0, 0, 0, 0, 0, 0, // dst node
                3, 0, 0, 0,             // src process
                4, 0, 0, 0,             // dst process
                5, 0, 0, 0, 0, 0, 0, 0, // src incarnation
                6, 0, 0, 0, 0, 0, 0, 0, // dst incarnation
                1, 0, 0, 0,             // connection class
                1, 0, 0, 0,             // interface count
                4, 3, 2, 1,             // interface address
            ]
        );
    }

    /// encodes the way a foreign-endian peer would: every scalar byte-swapped
    fn encode_swabbed(hello: &HelloMessage, version: ProtocolVersion) -> BytesMut {
        let mut buf = BytesMut::new();
        let (major, minor) = version.wire_version();

        buf.put_u32(version.magic());
        buf.put_u16(major);
        buf.put_u16(minor);

        match version {
            ProtocolVersion::V1 => {
                buf.put_u64(hello.src_node);
                buf.put_u32(hello.dst_process);
                buf.put_u32(hello.src_process);
                buf.put_u32(NetMsgKind::Hello as u32);
                buf.put_u32((hello.interfaces.len() * 4) as u32);
                buf.put_u32(hello.conn_class as u32);
            }
            ProtocolVersion::V2 | ProtocolVersion::V3 => {
                buf.put_u64(hello.src_node);
                buf.put_u64(hello.dst_node);
                buf.put_u32(hello.src_process);
                buf.put_u32(hello.dst_process);
                buf.put_u64(hello.src_incarnation);
                buf.put_u64(hello.dst_incarnation);
                buf.put_u32(hello.conn_class as u32);
                buf.put_u32(hello.interfaces.len() as u32);
            }
        }
        for &addr in &hello.interfaces {
            buf.put_u32(addr);
        }
        buf
    }

    #[rstest]
    #[case(ProtocolVersion::V1)]
    #[case(ProtocolVersion::V2)]
    #[case(ProtocolVersion::V3)]
    fn test_foreign_endian_peer(#[case] version: ProtocolVersion) {
        let hello = sample_hello(vec![0x0a000001, 0x0a000002]);
        let buf = encode_swabbed(&hello, version);

        let (decoded, decoded_version, flip) = decode_hello(&buf).unwrap();
        assert_eq!(decoded_version, version);
        assert!(flip);

        let expected = match version {
            ProtocolVersion::V1 => v1_normalized(hello),
            _ => hello,
        };
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_bad_magic() {
        let frame = [0x12u8, 0x34, 0x56, 0x78, 2, 0, 0, 0];
        match decode_hello(&frame) {
            Err(ProtocolError::BadMagic { magic: 0x78563412 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_v1_non_hello_frame() {
        let hello = sample_hello(vec![]);
        let mut buf = BytesMut::new();
        encode_hello(&hello, ProtocolVersion::V1, &mut buf);

        // patch the embedded message kind
        buf[24..28].copy_from_slice(&(NetMsgKind::Put as u32).to_le_bytes());

        match decode_hello(&buf) {
            Err(ProtocolError::BadMessageType { kind: 1 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[rstest]
    #[case::v1(ProtocolVersion::V1, 28..32)]
    #[case::v2(ProtocolVersion::V2, 52..56)]
    fn test_too_many_interfaces(#[case] version: ProtocolVersion, #[case] count_field: std::ops::Range<usize>) {
        let hello = sample_hello(vec![]);
        let mut buf = BytesMut::new();
        encode_hello(&hello, version, &mut buf);

        let advertised: u32 = match version {
            ProtocolVersion::V1 => 17 * 4, // byte length of the interface array
            _ => 17,
        };
        buf[count_field].copy_from_slice(&advertised.to_le_bytes());

        match decode_hello(&buf) {
            Err(ProtocolError::TooManyInterfaces { count: 17 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_zero_interface_address() {
        let hello = sample_hello(vec![0x0a000001, 0]);
        let mut buf = BytesMut::new();
        encode_hello(&hello, ProtocolVersion::V3, &mut buf);

        match decode_hello(&buf) {
            Err(ProtocolError::ZeroInterfaceAddress { index: 1 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_frame() {
        let hello = sample_hello(vec![]);
        let mut buf = BytesMut::new();
        encode_hello(&hello, ProtocolVersion::V2, &mut buf);

        match decode_hello(&buf[..20]) {
            Err(ProtocolError::Truncated) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[rstest]
    #[case::bumped_minor(HelloTestHook { bump_minor: true, legacy_magic: false }, 2, 1)]
    #[case::legacy_magic(HelloTestHook { bump_minor: false, legacy_magic: true }, 2, 0)]
    fn test_hook_degrades_gracefully(#[case] hook: HelloTestHook, #[case] major: u16, #[case] minor: u16) {
        let hello = sample_hello(vec![]);
        let mut buf = BytesMut::new();
        encode_hello_hooked(&hello, ProtocolVersion::V2, Some(&hook), &mut buf);

        // a mutated handshake is rejected cleanly instead of being misparsed
        match decode_hello(&buf) {
            Err(ProtocolError::UnsupportedVersion { major: m, minor: n }) => {
                assert_eq!((m, n), (major, minor));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[rstest]
    #[case(ProtocolVersion::V1)]
    #[case(ProtocolVersion::V2)]
    #[case(ProtocolVersion::V3)]
    fn test_send_recv_through_socket(#[case] version: ProtocolVersion) {
        let hello = sample_hello(vec![0x0a000001, 0x0a000002]);
        let timeout = Duration::from_secs(1);

        let sender = ScriptedSocket::new();
        send_hello(&sender, &hello, version, None, timeout).unwrap();

        let receiver = ScriptedSocket::with_input(&sender.written());
        let (received, received_version, flip) = recv_hello(&receiver, timeout).unwrap();

        assert_eq!(received_version, version);
        assert!(!flip);
        let expected = match version {
            ProtocolVersion::V1 => v1_normalized(hello),
            _ => hello,
        };
        assert_eq!(received, expected);
    }

    #[test]
    fn test_recv_short_stream() {
        let receiver = ScriptedSocket::with_input(&[0x63, 0x69]);
        match recv_hello(&receiver, Duration::from_secs(1)) {
            Err(ProtocolError::Socket(_)) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
