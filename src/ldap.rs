//! Directory access. The repositories talk to the directory through the
//! [`Directory`] trait; [`LdapDirectory`] is the production implementation
//! over a synchronous `ldap3` connection.

use crate::config::DirectorySettings;
use crate::diff::AttrChange;
use crate::error::Result;
use ldap3::{LdapConn, LdapConnSettings, Scope, SearchEntry};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Scope {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// A loaded directory entry: distinguished name plus string and binary
/// attribute values.
#[derive(Clone, Debug, Default)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    pub fn first(&self, attr: &str) -> Option<&str> {
        self.attrs
            .get(attr)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs.get(attr).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn binary(&self, attr: &str) -> &[Vec<u8>] {
        self.bin_attrs.get(attr).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl From<SearchEntry> for DirectoryEntry {
    fn from(entry: SearchEntry) -> Self {
        DirectoryEntry {
            dn: entry.dn,
            attrs: entry.attrs,
            bin_attrs: entry.bin_attrs,
        }
    }
}

/// Escape a value for embedding in an LDAP search filter.
pub fn escape_filter(input: &str) -> String {
    input
        .replace('\\', "\\5C")
        .replace('*', "\\2A")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// The directory collaborator. Calls are synchronous and may block on
/// network I/O; callers in a server context run them on a worker pool.
pub trait Directory: Send + Sync {
    fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>>;

    fn add(&self, dn: &str, attrs: Vec<(String, Vec<String>)>) -> Result<()>;

    fn modify(&self, dn: &str, changes: &[AttrChange]) -> Result<()>;

    fn delete(&self, dn: &str) -> Result<()>;

    fn find_one(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Option<DirectoryEntry>> {
        Ok(self.search(base, scope, filter, attrs)?.into_iter().next())
    }
}

/// `ldap3`-backed directory client. The connection is serialized behind a
/// mutex so the repositories can share one client across threads.
pub struct LdapDirectory {
    conn: Mutex<LdapConn>,
}

impl LdapDirectory {
    pub fn connect(settings: &DirectorySettings) -> Result<Self> {
        let conn_settings = LdapConnSettings::new()
            .set_conn_timeout(settings.conn_timeout)
            .set_no_tls_verify(true);

        let mut conn = LdapConn::with_settings(conn_settings, &settings.url())?;
        let bind_dn = format!("{}@{}", settings.bind_user, settings.domain);
        conn.simple_bind(&bind_dn, &settings.bind_password)?
            .success()?;

        log::debug!("bound to {} as {}", settings.url(), bind_dn);
        Ok(LdapDirectory {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LdapConn> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Directory for LdapDirectory {
    fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>> {
        let mut conn = self.lock();
        let (results, _) = conn
            .search(base, scope.into(), filter, attrs.to_vec())?
            .success()?;
        Ok(results
            .into_iter()
            .map(|entry| SearchEntry::construct(entry).into())
            .collect())
    }

    fn add(&self, dn: &str, attrs: Vec<(String, Vec<String>)>) -> Result<()> {
        let attrs: Vec<(String, HashSet<String>)> = attrs
            .into_iter()
            .map(|(name, values)| (name, values.into_iter().collect()))
            .collect();
        let mut conn = self.lock();
        conn.add(dn, attrs)?.success()?;
        Ok(())
    }

    fn modify(&self, dn: &str, changes: &[AttrChange]) -> Result<()> {
        let mods: Vec<_> = changes.iter().cloned().map(AttrChange::into_mod).collect();
        let mut conn = self.lock();
        conn.modify(dn, mods)?.success()?;
        Ok(())
    }

    fn delete(&self, dn: &str) -> Result<()> {
        let mut conn = self.lock();
        conn.delete(dn)?.success()?;
        Ok(())
    }
}
