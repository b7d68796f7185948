//! Zone-name and IP arithmetic. Pure functions, no I/O.
//!
//! Reverse zones are named by reversing the delegated IP octets in front of
//! a suffix such as `.in-addr.arpa`. The delegation is classless: a zone may
//! delegate fewer than three octets, in which case the node label itself
//! contains dots (zone `168.192.in-addr.arpa` + IP `192.168.1.123` gives
//! prefix `192.168` and label `1.123`). The split point is the zone's octet
//! group count, verified by textual round-trip, not a fixed last-octet rule.

use crate::dns::DnsZone;
use crate::error::{Error, Result};
use regex::Regex;
use std::net::Ipv4Addr;

/// Compiled zone/node name exclusion list.
#[derive(Clone, Debug)]
pub struct NameFilter {
    patterns: Vec<Regex>,
}

impl NameFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|_| Error::Invalid {
                    what: "exclusion pattern",
                    value: p.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(NameFilter { patterns })
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(name))
    }
}

/// True iff `name` case-insensitively ends with any configured suffix.
pub fn is_reverse_zone(name: &str, suffixes: &[String]) -> bool {
    reverse_suffix(name, suffixes).is_some()
}

fn reverse_suffix<'a>(name: &str, suffixes: &'a [String]) -> Option<&'a str> {
    let lower = name.to_ascii_lowercase();
    suffixes
        .iter()
        .find(|s| lower.ends_with(&s.to_ascii_lowercase()))
        .map(String::as_str)
}

/// Dotted prefix covered by a reverse zone: strip the suffix and reverse the
/// remaining octet groups (`1.168.192.in-addr.arpa` -> `192.168.1`).
fn zone_prefix(zone_name: &str, suffixes: &[String]) -> Option<String> {
    let suffix = reverse_suffix(zone_name, suffixes)?;
    let groups = &zone_name[..zone_name.len() - suffix.len()];
    if groups.is_empty() {
        return None;
    }
    Some(
        groups
            .split('.')
            .rev()
            .collect::<Vec<_>>()
            .join("."),
    )
}

/// Split an IPv4 address against a reverse zone into the zone-covered prefix
/// and the node label. `None` if the zone is not reverse, the IP does not
/// parse, or `prefix + "." + label` does not reconstruct the IP exactly.
pub fn split_ipv4(ip: &str, zone_name: &str, suffixes: &[String]) -> Option<(String, String)> {
    ip.parse::<Ipv4Addr>().ok()?;
    let prefix = zone_prefix(zone_name, suffixes)?;
    let label = ip.strip_prefix(&format!("{}.", prefix))?;
    if label.is_empty() {
        return None;
    }
    Some((prefix, label.to_string()))
}

/// Node label an IPv4 address maps to within a reverse zone.
pub fn node_name_from_ipv4(ip: &str, zone_name: &str, suffixes: &[String]) -> Option<String> {
    split_ipv4(ip, zone_name, suffixes).map(|(_, label)| label)
}

/// Inverse of [`split_ipv4`]: the IPv4 address a reverse zone node stands for.
pub fn ipv4_from_reverse(zone_name: &str, label: &str, suffixes: &[String]) -> Option<String> {
    let prefix = zone_prefix(zone_name, suffixes)?;
    let ip = format!("{}.{}", prefix, label);
    ip.parse::<Ipv4Addr>().ok()?;
    Some(ip)
}

/// Node label of `fqdn` within `zone_name`, i.e. the prefix before
/// `"." + zone_name`, compared case-insensitively.
pub fn node_name_from_fqdn(fqdn: &str, zone_name: &str) -> Option<String> {
    let suffix = format!(".{}", zone_name).to_ascii_lowercase();
    let lower = fqdn.to_ascii_lowercase();
    if lower.len() > suffix.len() && lower.ends_with(&suffix) {
        Some(fqdn[..fqdn.len() - suffix.len()].to_string())
    } else {
        None
    }
}

pub fn ipv4_matches_zone(ip: &str, zone_name: &str, suffixes: &[String]) -> bool {
    split_ipv4(ip, zone_name, suffixes).is_some()
}

/// First reverse zone covering `ip`.
pub fn find_zone_for_ipv4<'a>(
    ip: &str,
    zones: &'a [DnsZone],
    suffixes: &[String],
) -> Option<&'a DnsZone> {
    zones
        .iter()
        .filter(|z| z.is_reverse)
        .find(|z| ipv4_matches_zone(ip, &z.name, suffixes))
}

/// Longest-suffix zone match for a host name, found by progressively
/// stripping the leftmost label of `fqdn` and looking up each remainder.
pub fn find_zone_for_fqdn<'a>(fqdn: &str, zones: &'a [DnsZone]) -> Option<&'a DnsZone> {
    let mut candidate = fqdn;
    loop {
        if let Some(zone) = zones
            .iter()
            .filter(|z| !z.is_reverse)
            .find(|z| z.name.eq_ignore_ascii_case(candidate))
        {
            return Some(zone);
        }
        candidate = candidate.split_once('.')?.1;
    }
}
