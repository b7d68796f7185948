//! DHCP lease state. Leases come from an external source (the DHCP
//! server's lease list); this module only holds the derived lookup maps
//! used to decorate DNS query results.

use crate::error::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// A DHCP-assigned IP/hostname/MAC binding with a validity window.
/// Ephemeral: sourced from the lease list, never written back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DhcpLease {
    pub mac: String,
    pub ip: String,
    pub hostname: String,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub manufacturer: Option<String>,
}

/// External lease list collaborator.
pub trait LeaseSource: Send + Sync {
    fn list_leases(&self, active_only: bool) -> Result<Vec<DhcpLease>>;
}

#[derive(Default)]
struct LeaseMaps {
    by_ip: HashMap<String, DhcpLease>,
    by_hostname: HashMap<String, DhcpLease>,
}

impl LeaseMaps {
    /// On key collision the lease with the later `begin` wins.
    fn build(leases: Vec<DhcpLease>) -> Self {
        let mut maps = LeaseMaps::default();
        for lease in leases {
            match maps.by_ip.get(&lease.ip) {
                Some(existing) if existing.begin >= lease.begin => {}
                _ => {
                    maps.by_ip.insert(lease.ip.clone(), lease.clone());
                }
            }
            let host_key = lease.hostname.to_ascii_uppercase();
            match maps.by_hostname.get(&host_key) {
                Some(existing) if existing.begin >= lease.begin => {}
                _ => {
                    maps.by_hostname.insert(host_key, lease);
                }
            }
        }
        maps
    }
}

/// Snapshot cache over the active leases. Lookups read the current
/// snapshot; a refresh builds a new one and swaps it in atomically, so
/// readers never block on a refresh in flight and stale reads are fine.
pub struct DhcpLeaseCache {
    source: Arc<dyn LeaseSource>,
    maps: RwLock<Arc<LeaseMaps>>,
    loaded: AtomicBool,
}

impl DhcpLeaseCache {
    pub fn new(source: Arc<dyn LeaseSource>) -> Self {
        DhcpLeaseCache {
            source,
            maps: RwLock::new(Arc::new(LeaseMaps::default())),
            loaded: AtomicBool::new(false),
        }
    }

    /// Rebuild both maps from the active leases and swap them in.
    pub fn refresh(&self) -> Result<()> {
        let leases = self.source.list_leases(true)?;
        let maps = Arc::new(LeaseMaps::build(leases));
        *self.maps.write().unwrap_or_else(PoisonError::into_inner) = maps;
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    fn snapshot(&self) -> Arc<LeaseMaps> {
        if !self.loaded.load(Ordering::Acquire) {
            if let Err(e) = self.refresh() {
                log::warn!("initial lease refresh failed: {}", e);
            }
        }
        self.maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Latest active lease for an IP address.
    pub fn by_ip(&self, ip: &str) -> Option<DhcpLease> {
        self.snapshot().by_ip.get(ip).cloned()
    }

    /// Latest active lease for a host name, case-insensitively.
    pub fn by_hostname(&self, hostname: &str) -> Option<DhcpLease> {
        self.snapshot()
            .by_hostname
            .get(&hostname.to_ascii_uppercase())
            .cloned()
    }

    /// Periodic refresh task, independent of request traffic. The blocking
    /// lease collection runs off the async executor.
    pub fn spawn_refresher(cache: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let cache = Arc::clone(&cache);
                let outcome = tokio::task::spawn_blocking(move || cache.refresh()).await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => log::warn!("lease refresh failed: {}", e),
                    Err(e) => log::warn!("lease refresh task panicked: {}", e),
                }
            }
        })
    }
}
