//! Decoder for the binary format AD uses to store DNS resource records in
//! the `dnsRecord` attribute: a little-endian header (`data_length`,
//! `record_type`, `version`, `rank`, `flags`, `serial`, `ttl`, `reserved`,
//! `timestamp`) followed by a type-specific payload.
//!
//! Decoding never fails: truncated or malformed blobs come back as an
//! `Unknown` record carrying the original bytes, so one corrupt record
//! cannot fail an entire zone listing.

use crate::dhcp::DhcpLease;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Cursor, Read};
use std::net::Ipv6Addr;

macro_rules! record_types {
    ($($name:ident = $tag:expr),* $(,)?) => {
        /// Canonical DNS record types AD stores, plus `Unknown` for
        /// everything outside the table.
        #[allow(clippy::upper_case_acronyms)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum RecordType {
            $($name,)*
            Unknown,
        }

        impl RecordType {
            pub fn from_tag(tag: u16) -> Self {
                match tag {
                    $($tag => RecordType::$name,)*
                    _ => RecordType::Unknown,
                }
            }

            pub fn from_name(name: &str) -> Self {
                match name.trim().to_ascii_uppercase().as_str() {
                    $(stringify!($name) => RecordType::$name,)*
                    _ => RecordType::Unknown,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(RecordType::$name => stringify!($name),)*
                    RecordType::Unknown => "UNKNOWN",
                }
            }

            pub fn tag(self) -> Option<u16> {
                match self {
                    $(RecordType::$name => Some($tag),)*
                    RecordType::Unknown => None,
                }
            }
        }
    };
}

record_types! {
    ZERO = 0,
    A = 1,
    NS = 2,
    MD = 3,
    MF = 4,
    CNAME = 5,
    SOA = 6,
    MB = 7,
    MG = 8,
    MR = 9,
    NULL = 10,
    WKS = 11,
    PTR = 12,
    HINFO = 13,
    MINFO = 14,
    MX = 15,
    TXT = 16,
    RP = 17,
    AFSDB = 18,
    X25 = 19,
    ISDN = 20,
    RT = 21,
    NSAP = 22,
    NSAPPTR = 23,
    SIG = 24,
    KEY = 25,
    PX = 26,
    GPOS = 27,
    AAAA = 28,
    LOC = 29,
    NXT = 30,
    EID = 31,
    NIMLOC = 32,
    SRV = 33,
    ATMA = 34,
    NAPTR = 35,
    KX = 36,
    CERT = 37,
    A6 = 38,
    DNAME = 39,
    SINK = 40,
    OPT = 41,
    APL = 42,
    DS = 43,
    SSHFP = 44,
    IPSECKEY = 45,
    RRSIG = 46,
    NSEC = 47,
    DNSKEY = 48,
    DHCID = 49,
    NSEC3 = 50,
    NSEC3PARAM = 51,
    TLSA = 52,
    SMIMEA = 53,
    HIP = 55,
    NINFO = 56,
    RKEY = 57,
    TALINK = 58,
    CDS = 59,
    CDNSKEY = 60,
    OPENPGPKEY = 61,
    CSYNC = 62,
    ZONEMD = 63,
    SVCB = 64,
    HTTPS = 65,
    SPF = 99,
    UINFO = 100,
    UID = 101,
    GID = 102,
    UNSPEC = 103,
    NID = 104,
    L32 = 105,
    L64 = 106,
    LP = 107,
    EUI48 = 108,
    EUI64 = 109,
    TKEY = 249,
    TSIG = 250,
    IXFR = 251,
    AXFR = 252,
    MAILB = 253,
    MAILA = 254,
    ANY = 255,
    URI = 256,
    CAA = 257,
    AVC = 258,
    TA = 32768,
    DLV = 32769,
    WINS = 0xFF01,
    WINSR = 0xFF02,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl RecordType {
    /// The type whose records describe the same name/address relationship
    /// from the opposite direction.
    pub fn partner(self) -> Option<RecordType> {
        match self {
            RecordType::A | RecordType::AAAA => Some(RecordType::PTR),
            RecordType::PTR => Some(RecordType::A),
            _ => None,
        }
    }
}

/// True iff the two types form a recognized correlation pair, in either
/// order: {A, PTR} or {AAAA, PTR}.
pub fn are_correlated(a: RecordType, b: RecordType) -> bool {
    matches!(
        (a, b),
        (RecordType::A, RecordType::PTR)
            | (RecordType::PTR, RecordType::A)
            | (RecordType::AAAA, RecordType::PTR)
            | (RecordType::PTR, RecordType::AAAA)
    )
}

/// One decoded DNS record. `correlated_value` and `lease` are derived at
/// read time and never persisted.
#[derive(Clone, Debug)]
pub struct DnsRecord {
    pub record_type: RecordType,
    /// Human-readable value: dotted IPv4 for A, FQDN for PTR/CNAME, hex for
    /// undecoded payloads.
    pub value: String,
    /// Original wire bytes, kept for records we do not re-encode.
    pub raw: Option<Vec<u8>>,
    pub flags: u16,
    pub serial: u32,
    pub ttl: u32,
    pub correlated_value: Option<String>,
    pub lease: Option<DhcpLease>,
}

impl DnsRecord {
    pub fn new(record_type: RecordType, value: impl Into<String>) -> Self {
        DnsRecord {
            record_type,
            value: value.into(),
            raw: None,
            flags: 0,
            serial: 0,
            ttl: 180,
            correlated_value: None,
            lease: None,
        }
    }

    /// Identity is the (type, value) pair, value compared case-insensitively
    /// because FQDN-valued records are.
    pub fn same_identity(&self, other: &DnsRecord) -> bool {
        self.record_type == other.record_type && self.value.eq_ignore_ascii_case(&other.value)
    }
}

struct WireRecord {
    record_type: u16,
    rank: u8,
    flags: u16,
    serial: u32,
    ttl: u32,
    data: Vec<u8>,
}

impl WireRecord {
    fn from_bytes(bytes: &[u8]) -> std::io::Result<Self> {
        let mut cursor = Cursor::new(bytes);

        let data_length = cursor.read_u16::<LittleEndian>()?;
        let record_type = cursor.read_u16::<LittleEndian>()?;
        let _version = cursor.read_u8()?;
        let rank = cursor.read_u8()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let serial = cursor.read_u32::<LittleEndian>()?;
        let ttl = cursor.read_u32::<LittleEndian>()?;
        let _reserved = cursor.read_u32::<LittleEndian>()?;
        let _timestamp = cursor.read_u32::<LittleEndian>()?;

        let mut data = vec![0u8; data_length as usize];
        cursor.read_exact(&mut data)?;

        Ok(WireRecord {
            record_type,
            rank,
            flags,
            serial,
            ttl,
            data,
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24 + self.data.len());
        // writes to a Vec cannot fail
        buf.write_u16::<LittleEndian>(self.data.len() as u16).ok();
        buf.write_u16::<LittleEndian>(self.record_type).ok();
        buf.write_u8(5).ok();
        buf.write_u8(self.rank).ok();
        buf.write_u16::<LittleEndian>(self.flags).ok();
        buf.write_u32::<LittleEndian>(self.serial).ok();
        buf.write_u32::<LittleEndian>(self.ttl).ok();
        buf.write_u32::<LittleEndian>(0).ok();
        buf.write_u32::<LittleEndian>(0).ok();
        buf.extend_from_slice(&self.data);
        buf
    }
}

fn decode_a(data: &[u8]) -> Option<String> {
    if data.len() == 4 {
        Some(format!("{}.{}.{}.{}", data[0], data[1], data[2], data[3]))
    } else {
        None
    }
}

fn decode_aaaa(data: &[u8]) -> Option<String> {
    let octets: [u8; 16] = data.try_into().ok()?;
    Some(Ipv6Addr::from(octets).to_string())
}

/// AD counted name: total length, label count, then length-prefixed labels
/// terminated by a root label. Joined with `.`, trailing root dropped.
fn decode_counted_name(data: &[u8]) -> Option<String> {
    if data.len() < 2 {
        return None;
    }
    let label_count = data[1] as usize;
    let mut labels = Vec::with_capacity(label_count);
    let mut index = 2;

    for _ in 0..label_count {
        let len = *data.get(index)? as usize;
        index += 1;
        if len == 0 {
            break;
        }
        let label = data.get(index..index + len)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        index += len;
    }

    if labels.is_empty() {
        None
    } else {
        Some(labels.join("."))
    }
}

fn encode_counted_name(value: &str) -> Vec<u8> {
    let labels: Vec<&str> = value.split('.').filter(|l| !l.is_empty()).collect();
    let mut raw = Vec::new();
    for label in &labels {
        raw.push(label.len() as u8);
        raw.extend_from_slice(label.as_bytes());
    }
    raw.push(0);

    let mut data = Vec::with_capacity(2 + raw.len());
    data.push(raw.len() as u8);
    data.push(labels.len() as u8);
    data.extend_from_slice(&raw);
    data
}

fn unknown_record(bytes: &[u8], payload: &[u8], flags: u16, serial: u32, ttl: u32) -> DnsRecord {
    DnsRecord {
        record_type: RecordType::Unknown,
        value: hex::encode(payload),
        raw: Some(bytes.to_vec()),
        flags,
        serial,
        ttl,
        correlated_value: None,
        lease: None,
    }
}

/// Decode one `dnsRecord` blob. Only A, AAAA, PTR, CNAME and NS carry a
/// payload decoder; every other tag (and any malformed payload) falls back
/// to the generic hex rendering tagged `Unknown`.
pub fn decode(bytes: &[u8]) -> DnsRecord {
    let wire = match WireRecord::from_bytes(bytes) {
        Ok(wire) => wire,
        Err(_) => return unknown_record(bytes, bytes, 0, 0, 0),
    };

    let record_type = RecordType::from_tag(wire.record_type);
    let value = match record_type {
        RecordType::A => decode_a(&wire.data),
        RecordType::AAAA => decode_aaaa(&wire.data),
        RecordType::PTR | RecordType::CNAME | RecordType::NS => decode_counted_name(&wire.data),
        _ => None,
    };

    match value {
        Some(value) => DnsRecord {
            record_type,
            value,
            raw: Some(bytes.to_vec()),
            flags: wire.flags,
            serial: wire.serial,
            ttl: wire.ttl,
            correlated_value: None,
            lease: None,
        },
        None => unknown_record(bytes, &wire.data, wire.flags, wire.serial, wire.ttl),
    }
}

/// Encode a record back to the wire format, for the record types whose
/// payloads this crate understands. Production writes go through
/// `samba-tool`; this exists for embedders and tests that fabricate
/// directory content.
pub fn encode(record: &DnsRecord, serial: u32) -> Option<Vec<u8>> {
    let data = match record.record_type {
        RecordType::A => {
            let ip: std::net::Ipv4Addr = record.value.parse().ok()?;
            ip.octets().to_vec()
        }
        RecordType::AAAA => {
            let ip: Ipv6Addr = record.value.parse().ok()?;
            ip.octets().to_vec()
        }
        RecordType::PTR | RecordType::CNAME | RecordType::NS => encode_counted_name(&record.value),
        _ => return None,
    };

    Some(
        WireRecord {
            record_type: record.record_type.tag()?,
            rank: 240,
            flags: record.flags,
            serial,
            ttl: record.ttl,
            data,
        }
        .to_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_record_round_trip() {
        let bytes = encode(&DnsRecord::new(RecordType::A, "192.168.1.41"), 7).unwrap();
        let decoded = decode(&bytes);
        assert_eq!(decoded.record_type, RecordType::A);
        assert_eq!(decoded.value, "192.168.1.41");
        assert_eq!(decoded.serial, 7);
        assert_eq!(decoded.ttl, 180);
        assert_eq!(decoded.raw.as_deref(), Some(&bytes[..]));
    }

    #[test]
    fn aaaa_record_round_trip() {
        let bytes = encode(&DnsRecord::new(RecordType::AAAA, "2001:db8::41"), 1).unwrap();
        let decoded = decode(&bytes);
        assert_eq!(decoded.record_type, RecordType::AAAA);
        assert_eq!(decoded.value, "2001:db8::41");
    }

    #[test]
    fn ptr_record_round_trip_drops_root_label() {
        let bytes = encode(&DnsRecord::new(RecordType::PTR, "proxy.example.org"), 1).unwrap();
        let decoded = decode(&bytes);
        assert_eq!(decoded.record_type, RecordType::PTR);
        assert_eq!(decoded.value, "proxy.example.org");
    }

    #[test]
    fn truncated_input_becomes_unknown_with_raw_bytes() {
        for bytes in [&b""[..], &b"\x01\x02\x03"[..], &[0xffu8; 10][..]] {
            let decoded = decode(bytes);
            assert_eq!(decoded.record_type, RecordType::Unknown);
            assert_eq!(decoded.raw.as_deref(), Some(bytes));
        }
    }

    #[test]
    fn payload_shorter_than_header_claims_becomes_unknown() {
        let mut bytes = encode(&DnsRecord::new(RecordType::A, "10.0.0.1"), 1).unwrap();
        bytes.truncate(bytes.len() - 2);
        let decoded = decode(&bytes);
        assert_eq!(decoded.record_type, RecordType::Unknown);
        assert_eq!(decoded.raw.as_deref(), Some(&bytes[..]));
    }

    #[test]
    fn undecoded_types_keep_header_but_hex_payload() {
        // SOA is in the type table but has no payload decoder
        let wire = WireRecord {
            record_type: 6,
            rank: 240,
            flags: 0,
            serial: 42,
            ttl: 3600,
            data: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let decoded = decode(&wire.to_bytes());
        assert_eq!(decoded.record_type, RecordType::Unknown);
        assert_eq!(decoded.value, "deadbeef");
        assert_eq!(decoded.serial, 42);
    }

    #[test]
    fn type_table_lookup() {
        assert_eq!(RecordType::from_tag(1), RecordType::A);
        assert_eq!(RecordType::from_tag(12), RecordType::PTR);
        assert_eq!(RecordType::from_tag(0xFF01), RecordType::WINS);
        assert_eq!(RecordType::from_tag(4711), RecordType::Unknown);

        assert_eq!(RecordType::from_name("a"), RecordType::A);
        assert_eq!(RecordType::from_name(" PTR "), RecordType::PTR);
        assert_eq!(RecordType::from_name("bogus"), RecordType::Unknown);

        assert_eq!(RecordType::A.tag(), Some(1));
        assert_eq!(RecordType::Unknown.tag(), None);
    }

    #[test]
    fn correlation_pairs_are_symmetric() {
        let types = [
            RecordType::A,
            RecordType::AAAA,
            RecordType::PTR,
            RecordType::CNAME,
            RecordType::SOA,
            RecordType::Unknown,
        ];
        for a in types {
            for b in types {
                assert_eq!(are_correlated(a, b), are_correlated(b, a));
            }
        }
        assert!(are_correlated(RecordType::A, RecordType::PTR));
        assert!(are_correlated(RecordType::AAAA, RecordType::PTR));
        assert!(!are_correlated(RecordType::A, RecordType::AAAA));
        assert!(!are_correlated(RecordType::CNAME, RecordType::PTR));
    }
}
