//! Zone and node operations against the MicrosoftDNS subtree, including the
//! forward/reverse correlation machinery.
//!
//! The directory is the source of truth; this component keeps no state of
//! its own beyond the injected lease cache. Attribute changes go straight to
//! LDAP, record add/remove goes through `samba-tool` (AD refuses plain
//! attribute writes for those), and success of tool-mediated writes is
//! verified by re-reading the node, never by exit code alone.

use crate::config::Settings;
use crate::dhcp::DhcpLeaseCache;
use crate::diff;
use crate::dns::records::{self, DnsRecord, RecordType};
use crate::dns::topology::{self, NameFilter};
use crate::dns::{lease_for_record, parse_ad_timestamp, DnsNode, DnsPair, DnsZone, UnknownFilter};
use crate::error::{Error, Result};
use crate::ldap::{escape_filter, Directory, DirectoryEntry, SearchScope};
use crate::runner::PrivilegedRunner;
use std::cmp::Reverse;
use std::sync::Arc;

const NODE_ATTRS: &[&str] = &[
    "name",
    "dnsRecord",
    "dNSTombstoned",
    "whenCreated",
    "whenChanged",
    "description",
];

pub struct DnsRepository {
    directory: Arc<dyn Directory>,
    runner: Arc<dyn PrivilegedRunner>,
    leases: Arc<DhcpLeaseCache>,
    settings: Settings,
    filter: NameFilter,
    zones_base: String,
}

impl DnsRepository {
    pub fn new(
        directory: Arc<dyn Directory>,
        runner: Arc<dyn PrivilegedRunner>,
        leases: Arc<DhcpLeaseCache>,
        settings: &Settings,
    ) -> Result<Self> {
        let filter = NameFilter::new(&settings.dns.excluded_names)?;
        let zones_base = format!(
            "CN=MicrosoftDNS,DC=DomainDnsZones,{}",
            settings.directory.search_base()
        );
        Ok(DnsRepository {
            directory,
            runner,
            leases,
            settings: settings.clone(),
            filter,
            zones_base,
        })
    }

    fn zone_dn(&self, zone_name: &str) -> String {
        format!("DC={},{}", zone_name, self.zones_base)
    }

    fn node_dn(&self, zone_name: &str, node_name: &str) -> String {
        format!("DC={},{}", node_name, self.zone_dn(zone_name))
    }

    // ---- zones -----------------------------------------------------------

    /// All visible zones, with reverse/default derivation. Excluded names
    /// are hidden here, which also write-protects them further down.
    pub fn list_zones(&self) -> Result<Vec<DnsZone>> {
        let entries = self.directory.search(
            &self.zones_base,
            SearchScope::OneLevel,
            "(objectClass=dnsZone)",
            &["dc"],
        )?;

        let mut zones = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = match entry.first("dc") {
                Some(name) => name.to_string(),
                None => continue,
            };
            if self.filter.is_excluded(&name) {
                continue;
            }
            let is_reverse =
                topology::is_reverse_zone(&name, &self.settings.dns.reverse_zone_suffixes);
            let is_default = name.eq_ignore_ascii_case(&self.settings.dns.default_zone);
            zones.push(DnsZone {
                name,
                dn: entry.dn,
                is_reverse,
                is_default,
            });
        }
        zones.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(zones)
    }

    pub fn find_zone(&self, zone_name: &str) -> Result<Option<DnsZone>> {
        Ok(self
            .list_zones()?
            .into_iter()
            .find(|z| z.name.eq_ignore_ascii_case(zone_name)))
    }

    fn require_zone(&self, zones: &[DnsZone], zone_name: &str) -> Result<DnsZone> {
        zones
            .iter()
            .find(|z| z.name.eq_ignore_ascii_case(zone_name))
            .cloned()
            .ok_or_else(|| Error::not_found("zone", zone_name))
    }

    pub fn create_zone(&self, zone_name: &str) -> Result<DnsZone> {
        if self.filter.is_excluded(zone_name) {
            return Err(Error::excluded(zone_name));
        }
        self.runner
            .run(&["dns", "zonecreate", &self.settings.dns.server, zone_name])?;
        self.find_zone(zone_name)?.ok_or_else(|| {
            Error::tool(
                "samba-tool dns zonecreate",
                format!("zone '{}' absent after create", zone_name),
            )
        })
    }

    pub fn delete_zone(&self, zone_name: &str) -> Result<bool> {
        if self.filter.is_excluded(zone_name) {
            return Err(Error::excluded(zone_name));
        }
        if self.find_zone(zone_name)?.is_none() {
            return Ok(false);
        }
        self.runner
            .run(&["dns", "zonedelete", &self.settings.dns.server, zone_name])?;
        if self.find_zone(zone_name)?.is_some() {
            return Err(Error::tool(
                "samba-tool dns zonedelete",
                format!("zone '{}' still present after delete", zone_name),
            ));
        }
        Ok(true)
    }

    // ---- node reads ------------------------------------------------------

    /// All nodes of a zone, decoded, policy-filtered and enriched. A query
    /// of three characters or more additionally restricts the result to
    /// nodes matching it in any name, value, correlated value or lease
    /// field, case-insensitively.
    pub fn find_all(
        &self,
        zone_name: &str,
        unknown: UnknownFilter,
        query: Option<&str>,
    ) -> Result<Vec<DnsNode>> {
        let zones = self.list_zones()?;
        let zone = self.require_zone(&zones, zone_name)?;

        let entries = self.directory.search(
            &zone.dn,
            SearchScope::OneLevel,
            "(objectClass=dnsNode)",
            NODE_ATTRS,
        )?;

        let mut nodes = Vec::new();
        for entry in entries {
            let Some(mut node) = self.node_from_entry(entry, unknown) else {
                continue;
            };
            self.enrich(&zones, &zone, &mut node, true, true)?;
            nodes.push(node);
        }

        if let Some(query) = query {
            let query = query.trim().to_lowercase();
            if query.len() >= 3 {
                nodes.retain(|n| node_matches_query(n, &query));
            }
        }

        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    pub fn find_one(
        &self,
        zone_name: &str,
        node_name: &str,
        unknown: UnknownFilter,
    ) -> Result<Option<DnsNode>> {
        self.find_one_opts(zone_name, node_name, unknown, true, true)
    }

    /// As [`find_one`](Self::find_one), with correlation and lease
    /// enrichment individually switchable. The synchronization path uses
    /// this with both disabled to avoid enriching recursively.
    pub fn find_one_opts(
        &self,
        zone_name: &str,
        node_name: &str,
        unknown: UnknownFilter,
        correlate: bool,
        attach_leases: bool,
    ) -> Result<Option<DnsNode>> {
        if self.filter.is_excluded(node_name) {
            return Ok(None);
        }
        let zones = self.list_zones()?;
        let Some(zone) = zones
            .iter()
            .find(|z| z.name.eq_ignore_ascii_case(zone_name))
            .cloned()
        else {
            return Ok(None);
        };
        let Some(mut node) = self.load_node(&zone, node_name, unknown)? else {
            return Ok(None);
        };
        if correlate || attach_leases {
            self.enrich(&zones, &zone, &mut node, correlate, attach_leases)?;
        }
        Ok(Some(node))
    }

    pub fn exists(&self, zone_name: &str, node_name: &str, unknown: UnknownFilter) -> Result<bool> {
        Ok(self
            .find_one_opts(zone_name, node_name, unknown, false, false)?
            .is_some())
    }

    /// Resolve a host name to its node by trying the most specific
    /// configured forward zone first, falling back to the default zone with
    /// the whole host name as label.
    pub fn find_by_host_name(
        &self,
        host_name: &str,
        unknown: UnknownFilter,
    ) -> Result<Option<DnsNode>> {
        let zones = self.list_zones()?;
        let mut forward: Vec<&DnsZone> = zones.iter().filter(|z| !z.is_reverse).collect();
        forward.sort_by_key(|z| Reverse(z.name.matches('.').count()));

        for zone in forward {
            if let Some(label) = topology::node_name_from_fqdn(host_name, &zone.name) {
                return self.find_one(&zone.name, &label, unknown);
            }
        }
        self.find_one(&self.settings.dns.default_zone, host_name, unknown)
    }

    /// Nodes across all forward zones holding an A record for any of the
    /// given addresses. Full scan; operator-triggered lookups only.
    pub fn find_by_ips(&self, ips: &[String], unknown: UnknownFilter) -> Result<Vec<DnsNode>> {
        let zones = self.list_zones()?;
        let mut out = Vec::new();
        for zone in zones.iter().filter(|z| !z.is_reverse) {
            for node in self.find_all(&zone.name, unknown, None)? {
                let hit = node
                    .records
                    .iter()
                    .any(|r| r.record_type == RecordType::A && ips.contains(&r.value));
                if hit {
                    out.push(node);
                }
            }
        }
        Ok(out)
    }

    /// Locate the node that holds (or would hold) the correlated record of
    /// `record`. For A records that is the matching reverse zone node; for
    /// PTR records the forward zone node. Returns a placeholder pair with
    /// `node_exists == false` when the zone matches but the node is absent.
    pub fn find_correlated_node(&self, record: &DnsRecord) -> Result<Option<DnsPair>> {
        let zones = self.list_zones()?;
        self.correlated_pair(&zones, record)
    }

    // ---- node writes -----------------------------------------------------

    /// Persist a node's desired state. Record changes are applied one at a
    /// time through the tool layer; an empty desired record set deletes the
    /// node. Returns the refreshed node, or `None` when it was (or ended up)
    /// fully deleted. Reverse-side synchronization runs last.
    pub fn save(&self, zone_name: &str, node: &DnsNode) -> Result<Option<DnsNode>> {
        if self.filter.is_excluded(&node.name) {
            return Err(Error::excluded(&node.name));
        }
        let zones = self.list_zones()?;
        let zone = self.require_zone(&zones, zone_name)?;

        let existing = self.load_node(&zone, &node.name, UnknownFilter::All)?;
        let current = existing
            .as_ref()
            .map(|n| n.records.clone())
            .unwrap_or_default();

        let mut desired: Vec<DnsRecord> = Vec::new();
        for record in &node.records {
            if !desired.iter().any(|d| d.same_identity(record)) {
                desired.push(record.clone());
            }
        }

        let deleted: Vec<DnsRecord> = current
            .iter()
            .filter(|r| !desired.iter().any(|d| d.same_identity(r)))
            .cloned()
            .collect();
        let added: Vec<DnsRecord> = desired
            .iter()
            .filter(|r| !current.iter().any(|c| c.same_identity(r)))
            .cloned()
            .collect();

        if desired.is_empty() {
            if let Some(existing) = existing {
                self.directory.delete(&existing.dn)?;
                self.sync_reverse(&zone, &node.name, &[], &current);
            }
            return Ok(None);
        }

        if let Some(existing) = &existing {
            let mut entry = DirectoryEntry {
                dn: existing.dn.clone(),
                ..Default::default()
            };
            if let Some(description) = &existing.description {
                entry
                    .attrs
                    .insert("description".to_string(), vec![description.clone()]);
            }
            if let Some(change) =
                diff::diff_scalar(&entry, "description", node.description.as_deref())
            {
                self.directory.modify(&existing.dn, &[change])?;
            }
        }

        for record in &deleted {
            self.run_record_op("delete", &zone, &node.name, record)?;
        }
        for record in &added {
            self.run_record_op("add", &zone, &node.name, record)?;
        }

        let mut refreshed = self.load_node(&zone, &node.name, UnknownFilter::All)?;
        self.verify_record_changes(refreshed.as_ref(), &added, &deleted, &zone, &node.name)?;

        if existing.is_none() {
            if let (Some(refreshed), Some(description)) = (refreshed.as_mut(), &node.description) {
                self.directory.modify(
                    &refreshed.dn,
                    &[diff::AttrChange::Replace {
                        attr: "description".to_string(),
                        values: vec![description.clone()],
                    }],
                )?;
                refreshed.description = Some(description.clone());
            }
        }

        self.sync_reverse(&zone, &node.name, &added, &deleted);
        Ok(refreshed.filter(|n| !n.records.is_empty()))
    }

    /// Remove a node and keep its reverse side in sync. Deleting a node
    /// that does not exist is a no-op reported as `false`.
    pub fn delete(&self, zone_name: &str, node_name: &str) -> Result<bool> {
        if self.filter.is_excluded(node_name) {
            return Err(Error::excluded(node_name));
        }
        let zones = self.list_zones()?;
        let Some(zone) = zones
            .iter()
            .find(|z| z.name.eq_ignore_ascii_case(zone_name))
            .cloned()
        else {
            return Ok(false);
        };
        let Some(existing) = self.load_node(&zone, node_name, UnknownFilter::All)? else {
            return Ok(false);
        };

        self.directory.delete(&existing.dn)?;
        self.sync_reverse(&zone, node_name, &[], &existing.records);
        Ok(true)
    }

    /// Bulk delete, tolerant of individually missing nodes. With no names
    /// given, removes every visible node of the zone. Returns the number of
    /// nodes actually removed.
    pub fn delete_all(&self, zone_name: &str, node_names: Option<&[String]>) -> Result<usize> {
        let names: Vec<String> = match node_names {
            Some(names) => names.to_vec(),
            None => self
                .find_all(zone_name, UnknownFilter::All, None)?
                .into_iter()
                .map(|n| n.name)
                .collect(),
        };

        let mut removed = 0;
        for name in &names {
            if self.delete(zone_name, name)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ---- internals -------------------------------------------------------

    fn load_node(
        &self,
        zone: &DnsZone,
        node_name: &str,
        unknown: UnknownFilter,
    ) -> Result<Option<DnsNode>> {
        let filter = format!(
            "(&(objectClass=dnsNode)(name={}))",
            escape_filter(node_name)
        );
        let entry = self
            .directory
            .find_one(&zone.dn, SearchScope::OneLevel, &filter, NODE_ATTRS)?;
        Ok(entry.and_then(|e| self.node_from_entry(e, unknown)))
    }

    /// Decode a directory entry into a node, applying the exclusion policy
    /// and the unknown-record filter. Tombstoned entries and nodes left
    /// without records are treated as absent.
    fn node_from_entry(&self, entry: DirectoryEntry, unknown: UnknownFilter) -> Option<DnsNode> {
        let name = entry
            .first("name")
            .map(str::to_string)
            .or_else(|| rdn_value(&entry.dn))?;

        if self.filter.is_excluded(&name) {
            return None;
        }
        let tombstoned = entry
            .first("dNSTombstoned")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if tombstoned {
            return None;
        }

        let mut node = DnsNode::new(name);
        node.dn = entry.dn.clone();
        node.description = entry.first("description").map(str::to_string);
        node.created = entry.first("whenCreated").and_then(parse_ad_timestamp);
        node.modified = entry.first("whenChanged").and_then(parse_ad_timestamp);

        for blob in entry.binary("dnsRecord") {
            let record = records::decode(blob);
            if unknown.keeps(record.record_type) {
                node.add_record(record);
            }
        }

        if node.records.is_empty() {
            None
        } else {
            Some(node)
        }
    }

    fn enrich(
        &self,
        zones: &[DnsZone],
        zone: &DnsZone,
        node: &mut DnsNode,
        correlate: bool,
        attach_leases: bool,
    ) -> Result<()> {
        let node_name = node.name.clone();
        for record in &mut node.records {
            if correlate {
                record.correlated_value =
                    self.correlated_value(zones, zone, &node_name, record)?;
            }
            if attach_leases {
                record.lease = lease_for_record(
                    zone,
                    record,
                    &self.settings.dns.default_zone,
                    |ip| self.leases.by_ip(ip),
                    |host| self.leases.by_hostname(host),
                );
            }
        }
        Ok(())
    }

    fn correlated_pair(
        &self,
        zones: &[DnsZone],
        record: &DnsRecord,
    ) -> Result<Option<DnsPair>> {
        let suffixes = &self.settings.dns.reverse_zone_suffixes;
        let (zone, label) = match record.record_type {
            RecordType::A => {
                let Some(zone) = topology::find_zone_for_ipv4(&record.value, zones, suffixes)
                else {
                    return Ok(None);
                };
                let Some(label) = topology::node_name_from_ipv4(&record.value, &zone.name, suffixes)
                else {
                    return Ok(None);
                };
                (zone, label)
            }
            RecordType::PTR => {
                let Some(zone) = topology::find_zone_for_fqdn(&record.value, zones) else {
                    return Ok(None);
                };
                let Some(label) = topology::node_name_from_fqdn(&record.value, &zone.name) else {
                    return Ok(None);
                };
                (zone, label)
            }
            _ => return Ok(None),
        };

        if self.filter.is_excluded(&label) {
            return Ok(None);
        }

        match self.load_node(zone, &label, UnknownFilter::All)? {
            Some(node) => Ok(Some(DnsPair {
                zone_name: zone.name.clone(),
                node,
                node_exists: true,
            })),
            None => {
                let mut placeholder = DnsNode::new(label.clone());
                placeholder.dn = self.node_dn(&zone.name, &label);
                Ok(Some(DnsPair {
                    zone_name: zone.name.clone(),
                    node: placeholder,
                    node_exists: false,
                }))
            }
        }
    }

    /// The paired record's resolved value, when forward and reverse sides
    /// agree: the IP a reverse node stands for (A side), or the FQDN a
    /// forward node answers to (PTR side). Absence is not an error, merely
    /// "unsynchronized".
    fn correlated_value(
        &self,
        zones: &[DnsZone],
        zone: &DnsZone,
        node_name: &str,
        record: &DnsRecord,
    ) -> Result<Option<String>> {
        let suffixes = &self.settings.dns.reverse_zone_suffixes;
        // IPv4 only: the reverse arithmetic has no ip6.arpa path, so AAAA
        // records are decoded but never correlated or synchronized.
        match record.record_type {
            RecordType::A => {
                let Some(pair) = self.correlated_pair(zones, record)? else {
                    return Ok(None);
                };
                if !pair.node_exists {
                    return Ok(None);
                }
                let expected_fqdn = format!("{}.{}", node_name, zone.name);
                if pair.node.has_record(RecordType::PTR, &expected_fqdn) {
                    Ok(topology::ipv4_from_reverse(
                        &pair.zone_name,
                        &pair.node.name,
                        suffixes,
                    ))
                } else {
                    Ok(None)
                }
            }
            RecordType::PTR => {
                let Some(pair) = self.correlated_pair(zones, record)? else {
                    return Ok(None);
                };
                if !pair.node_exists {
                    return Ok(None);
                }
                let Some(expected_ip) =
                    topology::ipv4_from_reverse(&zone.name, node_name, suffixes)
                else {
                    return Ok(None);
                };
                if pair.node.has_record(RecordType::A, &expected_ip) {
                    Ok(Some(format!("{}.{}", pair.node.name, pair.zone_name)))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    fn run_record_op(
        &self,
        op: &str,
        zone: &DnsZone,
        node_name: &str,
        record: &DnsRecord,
    ) -> Result<()> {
        let type_name = record.record_type.name();
        self.runner.run(&[
            "dns",
            op,
            &self.settings.dns.server,
            &zone.name,
            node_name,
            type_name,
            &record.value,
        ])?;
        Ok(())
    }

    fn verify_record_changes(
        &self,
        refreshed: Option<&DnsNode>,
        added: &[DnsRecord],
        deleted: &[DnsRecord],
        zone: &DnsZone,
        node_name: &str,
    ) -> Result<()> {
        let missing_add = added.iter().find(|r| {
            !refreshed
                .map(|n| n.has_record(r.record_type, &r.value))
                .unwrap_or(false)
        });
        let lingering_delete = deleted.iter().find(|r| {
            refreshed
                .map(|n| n.has_record(r.record_type, &r.value))
                .unwrap_or(false)
        });

        if let Some(record) = missing_add {
            return Err(Error::tool(
                "samba-tool dns add",
                format!(
                    "{} record '{}' not present on {}.{} after add",
                    record.record_type, record.value, node_name, zone.name
                ),
            ));
        }
        if let Some(record) = lingering_delete {
            return Err(Error::tool(
                "samba-tool dns delete",
                format!(
                    "{} record '{}' still present on {}.{} after delete",
                    record.record_type, record.value, node_name, zone.name
                ),
            ));
        }
        Ok(())
    }

    /// Keep the reverse side in line after a forward-zone mutation. PTR
    /// edits never cascade back to A records, so this is a no-op for
    /// reverse zones. Paired nodes that do not exist are skipped (no
    /// implicit creation), and failures here are accepted drift: they are
    /// logged and surface only as a missing correlated value later.
    fn sync_reverse(
        &self,
        zone: &DnsZone,
        node_name: &str,
        added: &[DnsRecord],
        deleted: &[DnsRecord],
    ) {
        if zone.is_reverse {
            return;
        }
        let zones = match self.list_zones() {
            Ok(zones) => zones,
            Err(e) => {
                log::warn!("reverse sync for {}.{} skipped: {}", node_name, zone.name, e);
                return;
            }
        };
        let expected_fqdn = format!("{}.{}", node_name, zone.name);

        for record in deleted.iter().filter(|r| r.record_type == RecordType::A) {
            match self.correlated_pair(&zones, record) {
                Ok(Some(pair)) if pair.node_exists => {
                    if !pair.node.has_record(RecordType::PTR, &expected_fqdn) {
                        continue;
                    }
                    let mut target = pair.node.clone();
                    target.records.retain(|r| {
                        !(r.record_type == RecordType::PTR
                            && r.value.eq_ignore_ascii_case(&expected_fqdn))
                    });
                    if let Err(e) = self.save(&pair.zone_name, &target) {
                        log::warn!(
                            "failed to remove PTR '{}' from {}.{}: {}",
                            expected_fqdn, target.name, pair.zone_name, e
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => log::warn!("reverse lookup for {} failed: {}", record.value, e),
            }
        }

        for record in added.iter().filter(|r| r.record_type == RecordType::A) {
            match self.correlated_pair(&zones, record) {
                Ok(Some(pair)) if pair.node_exists => {
                    if pair.node.has_record(RecordType::PTR, &expected_fqdn) {
                        continue;
                    }
                    let mut target = pair.node.clone();
                    target.add_record(DnsRecord::new(RecordType::PTR, expected_fqdn.clone()));
                    if let Err(e) = self.save(&pair.zone_name, &target) {
                        log::warn!(
                            "failed to add PTR '{}' to {}.{}: {}",
                            expected_fqdn, target.name, pair.zone_name, e
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => log::warn!("reverse lookup for {} failed: {}", record.value, e),
            }
        }
    }
}

fn node_matches_query(node: &DnsNode, query: &str) -> bool {
    if node.name.to_lowercase().contains(query) {
        return true;
    }
    node.records.iter().any(|r| {
        r.value.to_lowercase().contains(query)
            || r.correlated_value
                .as_ref()
                .is_some_and(|v| v.to_lowercase().contains(query))
            || r.lease.as_ref().is_some_and(|l| {
                l.ip.to_lowercase().contains(query)
                    || l.hostname.to_lowercase().contains(query)
                    || l.mac.to_lowercase().contains(query)
            })
    })
}

/// Value of the leading RDN: `DC=proxy,DC=example.org,...` -> `proxy`.
fn rdn_value(dn: &str) -> Option<String> {
    dn.split(',')
        .next()
        .and_then(|rdn| rdn.split_once('='))
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DirectorySettings, DnsSettings, Settings, ToolSettings};
    use crate::dhcp::{DhcpLease, LeaseSource};
    use crate::ldap::testing::MemoryDirectory;
    use crate::runner::ToolOutput;
    use chrono::{TimeZone, Utc};

    const ZONES_BASE: &str = "CN=MicrosoftDNS,DC=DomainDnsZones,DC=example,DC=org";

    fn settings() -> Settings {
        Settings::new(
            DirectorySettings::new("dc1.example.org", "example.org", "Administrator", "secret"),
            DnsSettings::new("example.org", "dc1.example.org"),
            ToolSettings::new("administrator@EXAMPLE.ORG", "secret"),
        )
    }

    fn zone_dn(zone: &str) -> String {
        format!("DC={},{}", zone, ZONES_BASE)
    }

    fn node_dn(zone: &str, name: &str) -> String {
        format!("DC={},{}", name, zone_dn(zone))
    }

    fn put_zone(dir: &MemoryDirectory, name: &str) {
        let mut entry = DirectoryEntry {
            dn: zone_dn(name),
            ..Default::default()
        };
        entry
            .attrs
            .insert("objectClass".to_string(), vec!["dnsZone".to_string()]);
        entry.attrs.insert("dc".to_string(), vec![name.to_string()]);
        dir.put(entry);
    }

    fn put_node(dir: &MemoryDirectory, zone: &str, name: &str, records: &[(RecordType, &str)]) {
        let mut entry = DirectoryEntry {
            dn: node_dn(zone, name),
            ..Default::default()
        };
        entry
            .attrs
            .insert("objectClass".to_string(), vec!["dnsNode".to_string()]);
        entry
            .attrs
            .insert("name".to_string(), vec![name.to_string()]);
        let blobs: Vec<Vec<u8>> = records
            .iter()
            .map(|(ty, value)| {
                records::encode(&DnsRecord::new(*ty, *value), 1).expect("encodable record")
            })
            .collect();
        entry.bin_attrs.insert("dnsRecord".to_string(), blobs);
        dir.put(entry);
    }

    fn put_raw_record_node(dir: &MemoryDirectory, zone: &str, name: &str, blobs: Vec<Vec<u8>>) {
        let mut entry = DirectoryEntry {
            dn: node_dn(zone, name),
            ..Default::default()
        };
        entry
            .attrs
            .insert("objectClass".to_string(), vec!["dnsNode".to_string()]);
        entry
            .attrs
            .insert("name".to_string(), vec![name.to_string()]);
        entry.bin_attrs.insert("dnsRecord".to_string(), blobs);
        dir.put(entry);
    }

    /// Interprets `samba-tool dns ...` against the in-memory directory the
    /// way the real tool mutates AD.
    struct SimRunner {
        dir: Arc<MemoryDirectory>,
    }

    impl PrivilegedRunner for SimRunner {
        fn authenticate(&self) -> Result<()> {
            Ok(())
        }

        fn run(&self, args: &[&str]) -> Result<ToolOutput> {
            match args {
                ["dns", "add", _server, zone, name, ty, value] => {
                    let record = DnsRecord::new(RecordType::from_name(ty), *value);
                    let blob = records::encode(&record, 1).expect("encodable record");
                    let dn = node_dn(zone, name);
                    let updated = self.dir.update(&dn, |entry| {
                        entry
                            .bin_attrs
                            .entry("dnsRecord".to_string())
                            .or_default()
                            .push(blob.clone());
                    });
                    if !updated {
                        put_node(&self.dir, zone, name, &[(record.record_type, value)]);
                    }
                }
                ["dns", "delete", _server, zone, name, ty, value] => {
                    let record_type = RecordType::from_name(ty);
                    self.dir.update(&node_dn(zone, name), |entry| {
                        if let Some(blobs) = entry.bin_attrs.get_mut("dnsRecord") {
                            blobs.retain(|blob| {
                                let decoded = records::decode(blob);
                                !(decoded.record_type == record_type
                                    && decoded.value.eq_ignore_ascii_case(value))
                            });
                        }
                    });
                }
                ["dns", "zonecreate", _server, zone] => put_zone(&self.dir, zone),
                ["dns", "zonedelete", _server, zone] => {
                    let _ = self.dir.delete(&zone_dn(zone));
                }
                _ => {}
            }
            Ok(ToolOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    struct StaticLeases(Vec<DhcpLease>);

    impl LeaseSource for StaticLeases {
        fn list_leases(&self, _active_only: bool) -> Result<Vec<DhcpLease>> {
            Ok(self.0.clone())
        }
    }

    fn proxy_lease() -> DhcpLease {
        DhcpLease {
            mac: "52:54:00:12:34:56".to_string(),
            ip: "192.168.1.41".to_string(),
            hostname: "proxy".to_string(),
            begin: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap(),
            manufacturer: Some("QEMU".to_string()),
        }
    }

    fn fixture(leases: Vec<DhcpLease>) -> (Arc<MemoryDirectory>, DnsRepository) {
        let dir = Arc::new(MemoryDirectory::new());
        put_zone(&dir, "example.org");
        put_zone(&dir, "1.168.192.in-addr.arpa");

        let runner = Arc::new(SimRunner {
            dir: Arc::clone(&dir),
        });
        let cache = Arc::new(DhcpLeaseCache::new(Arc::new(StaticLeases(leases))));
        let repo = DnsRepository::new(
            dir.clone() as Arc<dyn Directory>,
            runner,
            cache,
            &settings(),
        )
        .unwrap();
        (dir, repo)
    }

    #[test]
    fn list_zones_derives_reverse_and_default() {
        let (_dir, repo) = fixture(Vec::new());
        let zones = repo.list_zones().unwrap();
        assert_eq!(zones.len(), 2);

        let reverse = repo.find_zone("1.168.192.IN-ADDR.ARPA").unwrap().unwrap();
        assert!(reverse.is_reverse);
        assert!(!reverse.is_default);

        let forward = repo.find_zone("example.org").unwrap().unwrap();
        assert!(!forward.is_reverse);
        assert!(forward.is_default);
    }

    #[test]
    fn forward_query_attaches_correlation_and_lease() {
        let (dir, repo) = fixture(vec![proxy_lease()]);
        put_node(&dir, "example.org", "proxy", &[(RecordType::A, "192.168.1.41")]);
        put_node(
            &dir,
            "1.168.192.in-addr.arpa",
            "41",
            &[(RecordType::PTR, "proxy.example.org")],
        );

        let nodes = repo
            .find_all("example.org", UnknownFilter::All, None)
            .unwrap();
        assert_eq!(nodes.len(), 1);
        let record = &nodes[0].records[0];
        assert_eq!(record.correlated_value.as_deref(), Some("192.168.1.41"));
        assert_eq!(record.lease.as_ref().unwrap().hostname, "proxy");
    }

    #[test]
    fn reverse_query_attaches_fqdn_and_lease_by_hostname() {
        let (dir, repo) = fixture(vec![proxy_lease()]);
        put_node(&dir, "example.org", "proxy", &[(RecordType::A, "192.168.1.41")]);
        put_node(
            &dir,
            "1.168.192.in-addr.arpa",
            "41",
            &[(RecordType::PTR, "proxy.example.org")],
        );

        let nodes = repo
            .find_all("1.168.192.in-addr.arpa", UnknownFilter::All, None)
            .unwrap();
        assert_eq!(nodes.len(), 1);
        let record = &nodes[0].records[0];
        assert_eq!(
            record.correlated_value.as_deref(),
            Some("proxy.example.org")
        );
        assert_eq!(record.lease.as_ref().unwrap().ip, "192.168.1.41");
    }

    #[test]
    fn unsynchronized_record_has_no_correlated_value() {
        let (dir, repo) = fixture(Vec::new());
        put_node(&dir, "example.org", "proxy", &[(RecordType::A, "192.168.1.41")]);
        // reverse node exists but points elsewhere
        put_node(
            &dir,
            "1.168.192.in-addr.arpa",
            "41",
            &[(RecordType::PTR, "other.example.org")],
        );

        let node = repo
            .find_one("example.org", "proxy", UnknownFilter::All)
            .unwrap()
            .unwrap();
        assert_eq!(node.records[0].correlated_value, None);
    }

    #[test]
    fn aaaa_records_are_decoded_but_never_correlated() {
        let (dir, repo) = fixture(Vec::new());
        put_node(&dir, "example.org", "v6host", &[(RecordType::AAAA, "2001:db8::41")]);

        let node = repo
            .find_one("example.org", "v6host", UnknownFilter::All)
            .unwrap()
            .unwrap();
        assert_eq!(node.records[0].value, "2001:db8::41");
        assert_eq!(node.records[0].correlated_value, None);
        assert!(repo
            .find_correlated_node(&node.records[0])
            .unwrap()
            .is_none());
    }

    #[test]
    fn unknown_filter_controls_record_visibility() {
        let (dir, repo) = fixture(Vec::new());
        let a_blob = records::encode(&DnsRecord::new(RecordType::A, "192.168.1.50"), 1).unwrap();
        put_raw_record_node(
            &dir,
            "example.org",
            "mixed",
            vec![a_blob, b"garbage".to_vec()],
        );
        put_node(&dir, "example.org", "clean", &[(RecordType::A, "192.168.1.51")]);

        let all = repo
            .find_all("example.org", UnknownFilter::All, None)
            .unwrap();
        assert_eq!(all.len(), 2);

        let no_unknown = repo
            .find_all("example.org", UnknownFilter::NoUnknown, None)
            .unwrap();
        assert!(no_unknown
            .iter()
            .all(|n| n.records.iter().all(|r| r.record_type != RecordType::Unknown)));

        let only_unknown = repo
            .find_all("example.org", UnknownFilter::Unknown, None)
            .unwrap();
        assert_eq!(only_unknown.len(), 1);
        assert_eq!(only_unknown[0].name, "mixed");
        assert!(only_unknown[0]
            .records
            .iter()
            .all(|r| r.record_type == RecordType::Unknown));
    }

    #[test]
    fn query_filters_nodes_but_ignores_short_queries() {
        let (dir, repo) = fixture(vec![proxy_lease()]);
        put_node(&dir, "example.org", "proxy", &[(RecordType::A, "192.168.1.41")]);
        put_node(&dir, "example.org", "mail", &[(RecordType::A, "192.168.1.60")]);

        let hits = repo
            .find_all("example.org", UnknownFilter::All, Some("prox"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "proxy");

        // lease MAC is searchable too
        let hits = repo
            .find_all("example.org", UnknownFilter::All, Some("52:54:00"))
            .unwrap();
        assert_eq!(hits.len(), 1);

        // below three characters the query is ignored
        let hits = repo
            .find_all("example.org", UnknownFilter::All, Some("pr"))
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn find_all_on_missing_zone_fails() {
        let (_dir, repo) = fixture(Vec::new());
        let err = repo
            .find_all("missing.org", UnknownFilter::All, None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "zone", .. }));
    }

    #[test]
    fn tombstoned_nodes_are_hidden() {
        let (dir, repo) = fixture(Vec::new());
        put_node(&dir, "example.org", "ghost", &[(RecordType::A, "192.168.1.66")]);
        dir.update(&node_dn("example.org", "ghost"), |entry| {
            entry
                .attrs
                .insert("dNSTombstoned".to_string(), vec!["TRUE".to_string()]);
        });

        assert!(!repo
            .exists("example.org", "ghost", UnknownFilter::All)
            .unwrap());
    }

    #[test]
    fn corrupt_timestamps_do_not_fail_listings() {
        let (dir, repo) = fixture(Vec::new());
        put_node(&dir, "example.org", "proxy", &[(RecordType::A, "192.168.1.41")]);
        dir.update(&node_dn("example.org", "proxy"), |entry| {
            entry.attrs.insert(
                "whenCreated".to_string(),
                vec!["2024013114521ä.0Z".to_string()],
            );
        });

        let nodes = repo
            .find_all("example.org", UnknownFilter::All, None)
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].created, None);
    }

    #[test]
    fn save_with_empty_record_set_deletes_node() {
        let (dir, repo) = fixture(Vec::new());
        put_node(&dir, "example.org", "stale", &[(RecordType::A, "192.168.1.77")]);

        let result = repo.save("example.org", &DnsNode::new("stale")).unwrap();
        assert!(result.is_none());
        assert!(!repo
            .exists("example.org", "stale", UnknownFilter::All)
            .unwrap());
    }

    #[test]
    fn save_adds_record_and_creates_ptr_on_existing_reverse_node() {
        let (dir, repo) = fixture(Vec::new());
        put_node(
            &dir,
            "1.168.192.in-addr.arpa",
            "50",
            &[(RecordType::PTR, "old.example.org")],
        );

        let node = DnsNode::new("web").with_record(DnsRecord::new(RecordType::A, "192.168.1.50"));
        let saved = repo.save("example.org", &node).unwrap().unwrap();
        assert!(saved.has_record(RecordType::A, "192.168.1.50"));

        let reverse = repo
            .find_one_opts(
                "1.168.192.in-addr.arpa",
                "50",
                UnknownFilter::All,
                false,
                false,
            )
            .unwrap()
            .unwrap();
        assert!(reverse.has_record(RecordType::PTR, "web.example.org"));
        assert!(reverse.has_record(RecordType::PTR, "old.example.org"));
    }

    #[test]
    fn save_does_not_create_missing_reverse_nodes() {
        let (_dir, repo) = fixture(Vec::new());
        let node = DnsNode::new("web").with_record(DnsRecord::new(RecordType::A, "192.168.1.51"));
        repo.save("example.org", &node).unwrap();

        assert!(!repo
            .exists("1.168.192.in-addr.arpa", "51", UnknownFilter::All)
            .unwrap());
    }

    #[test]
    fn deleting_a_record_removes_its_ptr() {
        let (dir, repo) = fixture(Vec::new());
        put_node(&dir, "example.org", "proxy", &[(RecordType::A, "192.168.1.41")]);
        put_node(
            &dir,
            "1.168.192.in-addr.arpa",
            "41",
            &[(RecordType::PTR, "proxy.example.org")],
        );

        assert!(repo.delete("example.org", "proxy").unwrap());

        // the PTR was the reverse node's only record, so the node is gone
        assert!(!repo
            .exists("1.168.192.in-addr.arpa", "41", UnknownFilter::All)
            .unwrap());
    }

    #[test]
    fn deleting_missing_node_is_a_reported_noop() {
        let (_dir, repo) = fixture(Vec::new());
        assert!(!repo.delete("example.org", "nonexistent").unwrap());
        assert!(!repo.delete("missing.org", "whatever").unwrap());
    }

    #[test]
    fn delete_all_tolerates_missing_nodes() {
        let (dir, repo) = fixture(Vec::new());
        put_node(&dir, "example.org", "one", &[(RecordType::A, "192.168.1.91")]);
        put_node(&dir, "example.org", "two", &[(RecordType::A, "192.168.1.92")]);

        let names = vec![
            "one".to_string(),
            "missing".to_string(),
            "two".to_string(),
        ];
        assert_eq!(repo.delete_all("example.org", Some(&names)).unwrap(), 2);
        assert!(repo
            .find_all("example.org", UnknownFilter::All, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn excluded_names_are_rejected_for_writes_and_hidden_from_reads() {
        let (dir, repo) = fixture(Vec::new());
        put_node(&dir, "example.org", "_kerberos", &[(RecordType::A, "192.168.1.5")]);

        assert!(repo
            .find_one("example.org", "_kerberos", UnknownFilter::All)
            .unwrap()
            .is_none());
        assert!(repo
            .find_all("example.org", UnknownFilter::All, None)
            .unwrap()
            .is_empty());

        let err = repo
            .save("example.org", &DnsNode::new("_kerberos"))
            .unwrap_err();
        assert!(matches!(err, Error::ExcludedName { .. }));
        let err = repo.delete("example.org", "@").unwrap_err();
        assert!(matches!(err, Error::ExcludedName { .. }));
    }

    #[test]
    fn find_by_host_name_prefers_most_specific_zone() {
        let (dir, repo) = fixture(Vec::new());
        put_zone(&dir, "sub.example.org");
        put_node(&dir, "sub.example.org", "www", &[(RecordType::A, "192.168.2.10")]);
        put_node(&dir, "example.org", "www.sub", &[(RecordType::A, "192.168.1.10")]);

        let node = repo
            .find_by_host_name("www.sub.example.org", UnknownFilter::All)
            .unwrap()
            .unwrap();
        assert_eq!(node.records[0].value, "192.168.2.10");
    }

    #[test]
    fn find_by_host_name_falls_back_to_default_zone() {
        let (dir, repo) = fixture(Vec::new());
        put_node(&dir, "example.org", "plain", &[(RecordType::A, "192.168.1.80")]);

        let node = repo
            .find_by_host_name("plain", UnknownFilter::All)
            .unwrap()
            .unwrap();
        assert_eq!(node.name, "plain");
        assert!(repo
            .find_by_host_name("absent.elsewhere.net", UnknownFilter::All)
            .unwrap()
            .is_none());
    }

    #[test]
    fn find_by_ips_scans_forward_zones() {
        let (dir, repo) = fixture(Vec::new());
        put_node(&dir, "example.org", "proxy", &[(RecordType::A, "192.168.1.41")]);
        put_node(&dir, "example.org", "mail", &[(RecordType::A, "192.168.1.60")]);

        let nodes = repo
            .find_by_ips(&["192.168.1.41".to_string()], UnknownFilter::All)
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "proxy");
    }

    #[test]
    fn correlated_node_placeholder_for_absent_reverse_node() {
        let (_dir, repo) = fixture(Vec::new());
        let record = DnsRecord::new(RecordType::A, "192.168.1.99");
        let pair = repo.find_correlated_node(&record).unwrap().unwrap();
        assert!(!pair.node_exists);
        assert_eq!(pair.zone_name, "1.168.192.in-addr.arpa");
        assert_eq!(pair.node.name, "99");

        // no reverse zone covers this address at all
        let record = DnsRecord::new(RecordType::A, "10.9.9.9");
        assert!(repo.find_correlated_node(&record).unwrap().is_none());
    }

    #[test]
    fn zone_create_and_delete_verify_directory_state() {
        let (_dir, repo) = fixture(Vec::new());
        let zone = repo.create_zone("lab.example.org").unwrap();
        assert!(!zone.is_reverse);

        assert!(repo.delete_zone("lab.example.org").unwrap());
        assert!(!repo.delete_zone("lab.example.org").unwrap());

        let err = repo.create_zone("RootDNSServers").unwrap_err();
        assert!(matches!(err, Error::ExcludedName { .. }));
    }
}
