//! Back-end for managing a Samba-based Active Directory domain controller:
//! DNS zones and nodes (with forward/reverse correlation), DHCP lease
//! decoration, and domain user/group accounts.
//!
//! The directory is the single source of truth. Reads decode AD's binary
//! `dnsRecord` attribute directly from LDAP; mutations the directory gates
//! behind `samba-tool` run through a privileged runner and are verified by
//! re-reading the intended state.

pub mod accounts;
pub mod config;
pub mod dhcp;
pub mod diff;
pub mod dns;
pub mod error;
pub mod ldap;
pub mod runner;

pub use error::{Error, Result};
