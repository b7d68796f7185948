//! Domain groups.

use crate::config::Settings;
use crate::diff;
use crate::dns::topology::NameFilter;
use crate::error::{Error, Result};
use crate::ldap::{escape_filter, Directory, DirectoryEntry, SearchScope};
use crate::runner::PrivilegedRunner;
use std::sync::Arc;

const GROUP_ATTRS: &[&str] = &["sAMAccountName", "description", "member"];

#[derive(Clone, Debug, Default)]
pub struct DomainGroup {
    pub name: String,
    pub dn: String,
    pub description: Option<String>,
    /// Member DNs.
    pub members: Vec<String>,
}

impl DomainGroup {
    pub fn new(name: impl Into<String>) -> Self {
        DomainGroup {
            name: name.into(),
            ..Default::default()
        }
    }
}

pub struct GroupRepository {
    directory: Arc<dyn Directory>,
    runner: Arc<dyn PrivilegedRunner>,
    filter: NameFilter,
    base_dn: String,
}

impl GroupRepository {
    pub fn new(
        directory: Arc<dyn Directory>,
        runner: Arc<dyn PrivilegedRunner>,
        settings: &Settings,
    ) -> Result<Self> {
        Ok(GroupRepository {
            directory,
            runner,
            filter: NameFilter::new(&settings.dns.excluded_names)?,
            base_dn: settings.directory.search_base(),
        })
    }

    pub fn find(&self, name: &str) -> Result<Option<DomainGroup>> {
        if self.filter.is_excluded(name) {
            return Ok(None);
        }
        Ok(self.load_entry(name)?.map(group_from_entry))
    }

    fn load_entry(&self, name: &str) -> Result<Option<DirectoryEntry>> {
        let filter = format!(
            "(&(objectClass=group)(sAMAccountName={}))",
            escape_filter(name)
        );
        self.directory
            .find_one(&self.base_dn, SearchScope::Subtree, &filter, GROUP_ATTRS)
    }

    /// Apply the difference between `group` and the stored group: scalar
    /// description plus one `member` add/remove per changed membership.
    pub fn save(&self, group: &DomainGroup) -> Result<DomainGroup> {
        if self.filter.is_excluded(&group.name) {
            return Err(Error::excluded(&group.name));
        }
        let entry = self
            .load_entry(&group.name)?
            .ok_or_else(|| Error::not_found("group", &group.name))?;

        let mut changes = Vec::new();
        changes.extend(diff::diff_scalar(
            &entry,
            "description",
            group.description.as_deref(),
        ));
        changes.extend(diff::diff_set(&entry, "member", &group.members));
        if !changes.is_empty() {
            self.directory.modify(&entry.dn, &changes)?;
        }

        self.find(&group.name)?
            .ok_or_else(|| Error::not_found("group", &group.name))
    }

    /// Provision a group through the tool layer; verified by re-reading.
    pub fn create(&self, name: &str) -> Result<DomainGroup> {
        if self.filter.is_excluded(name) {
            return Err(Error::excluded(name));
        }
        self.runner.run(&["group", "add", name])?;
        self.find(name)?.ok_or_else(|| {
            Error::tool(
                "samba-tool group add",
                format!("group '{}' absent after create", name),
            )
        })
    }

    /// Remove a group; `false` when it did not exist.
    pub fn delete(&self, name: &str) -> Result<bool> {
        if self.filter.is_excluded(name) {
            return Err(Error::excluded(name));
        }
        match self.load_entry(name)? {
            Some(entry) => {
                self.directory.delete(&entry.dn)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn group_from_entry(entry: DirectoryEntry) -> DomainGroup {
    DomainGroup {
        name: entry
            .first("sAMAccountName")
            .unwrap_or_default()
            .to_string(),
        description: entry.first("description").map(str::to_string),
        members: entry.values("member").to_vec(),
        dn: entry.dn,
    }
}
