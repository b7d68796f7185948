//! DNS domain model and the zone/node correlation engine.

pub mod records;
pub mod repository;
pub mod topology;

use crate::dhcp::DhcpLease;
use chrono::{DateTime, NaiveDateTime, Utc};
use records::{DnsRecord, RecordType};

pub use repository::DnsRepository;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsZone {
    pub name: String,
    pub dn: String,
    /// Derived from the configured reverse-zone suffixes, never stored.
    pub is_reverse: bool,
    pub is_default: bool,
}

/// Query-time inclusion policy for records of unrecognized DNS type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnknownFilter {
    /// Include every record.
    All,
    /// Drop records of unrecognized type.
    NoUnknown,
    /// Show only records of unrecognized type.
    Unknown,
}

impl UnknownFilter {
    pub fn keeps(self, record_type: RecordType) -> bool {
        match self {
            UnknownFilter::All => true,
            UnknownFilter::NoUnknown => record_type != RecordType::Unknown,
            UnknownFilter::Unknown => record_type == RecordType::Unknown,
        }
    }
}

/// The set of DNS records sharing one label within one zone. A node with
/// zero records has no independent existence.
#[derive(Clone, Debug, Default)]
pub struct DnsNode {
    pub name: String,
    pub dn: String,
    pub records: Vec<DnsRecord>,
    pub description: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl DnsNode {
    pub fn new(name: impl Into<String>) -> Self {
        DnsNode {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Records are unique by (type, value); duplicates collapse.
    pub fn add_record(&mut self, record: DnsRecord) {
        if !self.records.iter().any(|r| r.same_identity(&record)) {
            self.records.push(record);
        }
    }

    pub fn with_record(mut self, record: DnsRecord) -> Self {
        self.add_record(record);
        self
    }

    pub fn has_record(&self, record_type: RecordType, value: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.record_type == record_type && r.value.eq_ignore_ascii_case(value))
    }
}

/// Where the correlated record of a given record lives (or would live):
/// the paired zone plus the node holding the partner record. `node_exists`
/// is false when the node is a placeholder that is not in the directory.
#[derive(Clone, Debug)]
pub struct DnsPair {
    pub zone_name: String,
    pub node: DnsNode,
    pub node_exists: bool,
}

/// AD generalized time, e.g. `20240131145210.0Z`. Returns `None` for any
/// value too short or not sliceable at the seconds boundary, so a corrupt
/// attribute can never fail a query.
pub(crate) fn parse_ad_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let digits = value.get(..14)?;
    NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Attach the DHCP lease matching a record, if any. Forward zones match A
/// records by IP; reverse zones match PTR records pointing into the default
/// zone by host name.
pub(crate) fn lease_for_record(
    zone: &DnsZone,
    record: &DnsRecord,
    default_zone: &str,
    by_ip: impl Fn(&str) -> Option<DhcpLease>,
    by_hostname: impl Fn(&str) -> Option<DhcpLease>,
) -> Option<DhcpLease> {
    if !zone.is_reverse && record.record_type == RecordType::A {
        return by_ip(&record.value);
    }
    if zone.is_reverse && record.record_type == RecordType::PTR {
        let suffix = format!(".{}", default_zone).to_ascii_lowercase();
        let value = record.value.to_ascii_lowercase();
        if let Some(host) = value.strip_suffix(&suffix) {
            return by_hostname(host);
        }
    }
    None
}
