//! Minimal SNMPv2c client
//!
//! Implements just enough of the BER encoding to issue GET and GETNEXT
//! requests and decode their responses: interface octet counters for
//! bandwidth probes, plus device validation and interface discovery.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, instrument, trace};

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

const PDU_GET: u8 = 0xa0;
const PDU_GET_NEXT: u8 = 0xa1;
const PDU_RESPONSE: u8 = 0xa2;

const VERSION_2C: i64 = 1;

const MAX_WALK: usize = 10_000;

pub const SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";
pub const IF_NAME: &str = "1.3.6.1.2.1.31.1.1.1.1";
pub const IF_HC_IN_OCTETS: &str = "1.3.6.1.2.1.31.1.1.1.6";
pub const IF_HC_OUT_OCTETS: &str = "1.3.6.1.2.1.31.1.1.1.10";
pub const IF_ALIAS: &str = "1.3.6.1.2.1.31.1.1.1.18";
pub const IF_SPEED: &str = "1.3.6.1.2.1.2.2.1.5";

#[derive(Debug, Error)]
pub enum SnmpError {
    #[error("malformed SNMP message: {0}")]
    Malformed(String),

    #[error("no response from {0}")]
    Timeout(SocketAddr),

    #[error("SNMP socket error: {0}")]
    Socket(#[source] std::io::Error),

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("agent returned error status {status} at index {index}")]
    ErrorStatus { status: i64, index: i64 },

    #[error("{oid} is not available on the agent")]
    NoSuchObject { oid: Oid },
}

fn malformed(reason: impl Into<String>) -> SnmpError {
    SnmpError::Malformed(reason.into())
}

/// Object identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Self {
        Self(arcs)
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.0.clone();
        arcs.push(arc);
        Oid(arcs)
    }

    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn last(&self) -> Option<u32> {
        self.0.last().copied()
    }
}

impl FromStr for Oid {
    type Err = SnmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let arcs = s
            .trim_start_matches('.')
            .split('.')
            .map(|arc| arc.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| malformed(format!("invalid OID '{s}'")))?;
        if arcs.len() < 2 {
            return Err(malformed(format!("OID '{s}' needs at least two arcs")));
        }
        Ok(Oid(arcs))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arcs: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&arcs.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    Oid(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
    Other(u8, Vec<u8>),
}

impl SnmpValue {
    /// Numeric value of counter, gauge and integer types
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SnmpValue::Counter64(value) => Some(*value),
            SnmpValue::Counter32(value) | SnmpValue::Gauge32(value) | SnmpValue::TimeTicks(value) => {
                Some(u64::from(*value))
            }
            SnmpValue::Integer(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            SnmpValue::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    fn is_exception(&self) -> bool {
        matches!(
            self,
            SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    Get,
    GetNext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<(Oid, SnmpValue)>,
}

// ---------------------------------------------------------------------------
// BER encoding
// ---------------------------------------------------------------------------

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

fn encode_tlv(tag: u8, content: &[u8], out: &mut Vec<u8>) {
    out.push(tag);
    encode_length(content.len(), out);
    out.extend_from_slice(content);
}

fn integer_content(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // drop redundant sign-extension bytes
    while start < bytes.len() - 1 {
        let (current, next) = (bytes[start], bytes[start + 1]);
        if (current == 0x00 && next & 0x80 == 0) || (current == 0xff && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    bytes[start..].to_vec()
}

pub fn encode_integer(value: i64, out: &mut Vec<u8>) {
    encode_tlv(TAG_INTEGER, &integer_content(value), out);
}

pub fn encode_oid(oid: &Oid, out: &mut Vec<u8>) -> Result<(), SnmpError> {
    let arcs = oid.arcs();
    let (first, second) = match arcs {
        [first @ 0..=2, second, ..] => (*first, *second),
        _ => return Err(malformed(format!("cannot encode OID {oid}"))),
    };
    if first < 2 && second >= 40 {
        return Err(malformed(format!("cannot encode OID {oid}")));
    }

    let mut content = Vec::with_capacity(arcs.len() + 4);
    encode_base128(first * 40 + second, &mut content);
    for arc in &arcs[2..] {
        encode_base128(*arc, &mut content);
    }
    encode_tlv(TAG_OID, &content, out);
    Ok(())
}

fn encode_base128(mut value: u32, out: &mut Vec<u8>) {
    let mut chunk = [0u8; 5];
    let mut len = 0;
    loop {
        chunk[len] = (value & 0x7f) as u8;
        len += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..len).rev() {
        let continuation = if i == 0 { 0 } else { 0x80 };
        out.push(chunk[i] | continuation);
    }
}

/// Builds a complete SNMPv2c request message with NULL-valued varbinds
pub fn encode_request(
    kind: PduKind,
    community: &str,
    request_id: i32,
    oids: &[Oid],
) -> Result<Vec<u8>, SnmpError> {
    let mut varbinds = Vec::new();
    for oid in oids {
        let mut varbind = Vec::new();
        encode_oid(oid, &mut varbind)?;
        encode_tlv(TAG_NULL, &[], &mut varbind);
        encode_tlv(TAG_SEQUENCE, &varbind, &mut varbinds);
    }

    let mut pdu = Vec::new();
    encode_integer(i64::from(request_id), &mut pdu);
    encode_integer(0, &mut pdu);
    encode_integer(0, &mut pdu);
    encode_tlv(TAG_SEQUENCE, &varbinds, &mut pdu);

    let mut message = Vec::new();
    encode_integer(VERSION_2C, &mut message);
    encode_tlv(TAG_OCTET_STRING, community.as_bytes(), &mut message);
    let tag = match kind {
        PduKind::Get => PDU_GET,
        PduKind::GetNext => PDU_GET_NEXT,
    };
    encode_tlv(tag, &pdu, &mut message);

    let mut out = Vec::with_capacity(message.len() + 4);
    encode_tlv(TAG_SEQUENCE, &message, &mut out);
    Ok(out)
}

// ---------------------------------------------------------------------------
// BER decoding
// ---------------------------------------------------------------------------

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), SnmpError> {
        let (&tag, rest) = self
            .bytes
            .split_first()
            .ok_or_else(|| malformed("unexpected end of message"))?;
        let (&first, mut rest) = rest
            .split_first()
            .ok_or_else(|| malformed("missing length"))?;

        let len = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let count = usize::from(first & 0x7f);
            if count == 0 || count > std::mem::size_of::<usize>() || rest.len() < count {
                return Err(malformed("invalid length"));
            }
            let (len_bytes, tail) = rest.split_at(count);
            rest = tail;
            len_bytes
                .iter()
                .fold(0usize, |acc, byte| (acc << 8) | usize::from(*byte))
        };

        if rest.len() < len {
            return Err(malformed(format!(
                "value of {len} bytes exceeds remaining {}",
                rest.len()
            )));
        }
        let (content, tail) = rest.split_at(len);
        self.bytes = tail;
        Ok((tag, content))
    }

    fn expect(&mut self, expected: u8) -> Result<&'a [u8], SnmpError> {
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            return Err(malformed(format!(
                "expected tag {expected:#04x}, found {tag:#04x}"
            )));
        }
        Ok(content)
    }

    fn read_integer(&mut self) -> Result<i64, SnmpError> {
        decode_integer(self.expect(TAG_INTEGER)?)
    }
}

fn decode_integer(content: &[u8]) -> Result<i64, SnmpError> {
    if content.is_empty() || content.len() > 8 {
        return Err(malformed("invalid integer length"));
    }
    let negative = content[0] & 0x80 != 0;
    let init: i64 = if negative { -1 } else { 0 };
    Ok(content
        .iter()
        .fold(init, |acc, byte| (acc << 8) | i64::from(*byte)))
}

fn decode_unsigned(content: &[u8]) -> Result<u64, SnmpError> {
    let content = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if content.is_empty() || content.len() > 8 {
        return Err(malformed("invalid unsigned length"));
    }
    Ok(content
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
}

fn decode_u32(content: &[u8]) -> Result<u32, SnmpError> {
    u32::try_from(decode_unsigned(content)?).map_err(|_| malformed("32-bit value out of range"))
}

pub fn decode_oid(content: &[u8]) -> Result<Oid, SnmpError> {
    let mut subidentifiers = Vec::new();
    let mut value: u32 = 0;
    for (i, byte) in content.iter().enumerate() {
        value = value
            .checked_mul(128)
            .ok_or_else(|| malformed("OID arc overflow"))?
            | u32::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            subidentifiers.push(value);
            value = 0;
        } else if i == content.len() - 1 {
            return Err(malformed("truncated OID"));
        }
    }

    let (&first, rest) = subidentifiers
        .split_first()
        .ok_or_else(|| malformed("empty OID"))?;
    let mut arcs = Vec::with_capacity(subidentifiers.len() + 1);
    match first {
        0..=39 => arcs.extend([0, first]),
        40..=79 => arcs.extend([1, first - 40]),
        _ => arcs.extend([2, first - 80]),
    }
    arcs.extend_from_slice(rest);
    Ok(Oid(arcs))
}

fn decode_value(tag: u8, content: &[u8]) -> Result<SnmpValue, SnmpError> {
    Ok(match tag {
        TAG_INTEGER => SnmpValue::Integer(decode_integer(content)?),
        TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        TAG_NULL => SnmpValue::Null,
        TAG_OID => SnmpValue::Oid(decode_oid(content)?),
        TAG_IP_ADDRESS => SnmpValue::IpAddress(
            content
                .try_into()
                .map_err(|_| malformed("IpAddress must be 4 bytes"))?,
        ),
        TAG_COUNTER32 => SnmpValue::Counter32(decode_u32(content)?),
        TAG_GAUGE32 => SnmpValue::Gauge32(decode_u32(content)?),
        TAG_TIMETICKS => SnmpValue::TimeTicks(decode_u32(content)?),
        TAG_COUNTER64 => SnmpValue::Counter64(decode_unsigned(content)?),
        TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        other => SnmpValue::Other(other, content.to_vec()),
    })
}

/// Parses an SNMPv2c Response message
pub fn decode_response(bytes: &[u8]) -> Result<Response, SnmpError> {
    let mut outer = Reader::new(bytes);
    let mut message = Reader::new(outer.expect(TAG_SEQUENCE)?);

    let version = message.read_integer()?;
    if version != VERSION_2C {
        return Err(malformed(format!("unsupported SNMP version {version}")));
    }
    message.expect(TAG_OCTET_STRING)?;

    let mut pdu = Reader::new(message.expect(PDU_RESPONSE)?);
    let request_id = i32::try_from(pdu.read_integer()?)
        .map_err(|_| malformed("request id out of range"))?;
    let error_status = pdu.read_integer()?;
    let error_index = pdu.read_integer()?;

    let mut list = Reader::new(pdu.expect(TAG_SEQUENCE)?);
    let mut varbinds = Vec::new();
    while !list.is_empty() {
        let mut varbind = Reader::new(list.expect(TAG_SEQUENCE)?);
        let oid = decode_oid(varbind.expect(TAG_OID)?)?;
        let (tag, content) = varbind.read_tlv()?;
        varbinds.push((oid, decode_value(tag, content)?));
    }

    Ok(Response {
        request_id,
        error_status,
        error_index,
        varbinds,
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Interface as reported by IF-MIB
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct InterfaceInfo {
    pub if_index: u32,
    pub name: String,
    pub alias: String,
    /// Nominal speed in bits per second
    pub speed: Option<u64>,
}

#[derive(Debug)]
pub struct SnmpClient {
    target: SocketAddr,
    community: String,
    timeout: Duration,
    retries: u32,
    next_request_id: AtomicI32,
}

impl SnmpClient {
    pub fn new(target: SocketAddr, community: &str) -> Self {
        Self {
            target,
            community: community.to_string(),
            timeout: Duration::from_secs(2),
            retries: 1,
            next_request_id: AtomicI32::new(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration, retries: u32) -> Self {
        self.timeout = timeout;
        self.retries = retries;
        self
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    fn request_id(&self) -> i32 {
        // keep ids positive
        self.next_request_id.fetch_add(1, Ordering::Relaxed) & i32::MAX
    }

    #[instrument(skip(self, oids), fields(target = %self.target))]
    async fn request(&self, kind: PduKind, oids: &[Oid]) -> Result<Response, SnmpError> {
        let local: SocketAddr = if self.target.is_ipv6() {
            "[::]:0".parse().map_err(|_| malformed("bad bind address"))?
        } else {
            "0.0.0.0:0".parse().map_err(|_| malformed("bad bind address"))?
        };
        let socket = UdpSocket::bind(local).await.map_err(SnmpError::Socket)?;
        socket.connect(self.target).await?;

        let mut buffer = vec![0u8; 65_535];
        for attempt in 0..=self.retries {
            let request_id = self.request_id();
            let message = encode_request(kind, &self.community, request_id, oids)?;
            socket.send(&message).await?;
            trace!("sent {kind:?} #{request_id} (attempt {})", attempt + 1);

            let deadline = tokio::time::Instant::now() + self.timeout;
            loop {
                let received = tokio::time::timeout_at(deadline, socket.recv(&mut buffer)).await;
                let Ok(len) = received else {
                    break;
                };
                let response = match decode_response(&buffer[..len?]) {
                    Ok(response) => response,
                    Err(e) => {
                        trace!("discarding undecodable datagram: {e}");
                        continue;
                    }
                };
                if response.request_id != request_id {
                    trace!("discarding stale response #{}", response.request_id);
                    continue;
                }
                if response.error_status != 0 {
                    return Err(SnmpError::ErrorStatus {
                        status: response.error_status,
                        index: response.error_index,
                    });
                }
                return Ok(response);
            }
        }

        Err(SnmpError::Timeout(self.target))
    }

    pub async fn get(&self, oids: &[Oid]) -> Result<Vec<(Oid, SnmpValue)>, SnmpError> {
        let response = self.request(PduKind::Get, oids).await?;
        if let Some((oid, _)) = response.varbinds.iter().find(|(_, value)| value.is_exception()) {
            return Err(SnmpError::NoSuchObject { oid: oid.clone() });
        }
        Ok(response.varbinds)
    }

    pub async fn get_next(&self, oid: &Oid) -> Result<Option<(Oid, SnmpValue)>, SnmpError> {
        let response = self.request(PduKind::GetNext, std::slice::from_ref(oid)).await?;
        Ok(response
            .varbinds
            .into_iter()
            .next()
            .filter(|(_, value)| !value.is_exception()))
    }

    /// Collects every object below `root`
    pub async fn walk(&self, root: &Oid) -> Result<Vec<(Oid, SnmpValue)>, SnmpError> {
        let mut results = Vec::new();
        let mut cursor = root.clone();
        while results.len() < MAX_WALK {
            let Some((oid, value)) = self.get_next(&cursor).await? else {
                break;
            };
            // agents must return strictly increasing OIDs, guard against loops
            if !oid.starts_with(root) || oid <= cursor {
                break;
            }
            cursor = oid.clone();
            results.push((oid, value));
        }
        Ok(results)
    }

    /// Reads sysDescr, proving the agent answers with this community
    pub async fn validate_connection(&self) -> Result<String, SnmpError> {
        let oid: Oid = SYS_DESCR.parse()?;
        let varbinds = self.get(std::slice::from_ref(&oid)).await?;
        let description = varbinds
            .into_iter()
            .next()
            .and_then(|(_, value)| value.as_text())
            .unwrap_or_default();
        debug!("{} answered: {description}", self.target);
        Ok(description)
    }

    pub async fn discover_interfaces(&self) -> Result<Vec<InterfaceInfo>, SnmpError> {
        let mut interfaces: BTreeMap<u32, InterfaceInfo> = BTreeMap::new();

        for (oid, value) in self.walk(&IF_NAME.parse()?).await? {
            if let Some(if_index) = oid.last() {
                let entry = interfaces.entry(if_index).or_default();
                entry.if_index = if_index;
                entry.name = value.as_text().unwrap_or_default();
            }
        }
        for (oid, value) in self.walk(&IF_ALIAS.parse()?).await? {
            if let Some(entry) = oid.last().and_then(|index| interfaces.get_mut(&index)) {
                entry.alias = value.as_text().unwrap_or_default();
            }
        }
        for (oid, value) in self.walk(&IF_SPEED.parse()?).await? {
            if let Some(entry) = oid.last().and_then(|index| interfaces.get_mut(&index)) {
                entry.speed = value.as_u64();
            }
        }

        debug!("{} reports {} interfaces", self.target, interfaces.len());
        Ok(interfaces.into_values().collect())
    }
}
