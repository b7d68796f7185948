//! Domain user accounts.

use crate::config::Settings;
use crate::diff::{self, AttrChange};
use crate::dns::topology::NameFilter;
use crate::error::{Error, Result};
use crate::ldap::{escape_filter, Directory, DirectoryEntry, SearchScope};
use crate::runner::PrivilegedRunner;
use std::sync::Arc;

const USER_ATTRS: &[&str] = &[
    "sAMAccountName",
    "displayName",
    "mail",
    "memberOf",
    "userAccountControl",
];

// ACCOUNTDISABLE bit of userAccountControl
const UAC_DISABLED: u32 = 0x2;

#[derive(Clone, Debug, Default)]
pub struct DomainUser {
    pub account_name: String,
    pub dn: String,
    pub display_name: Option<String>,
    pub mail: Option<String>,
    /// DNs of the groups the account is a member of.
    pub groups: Vec<String>,
    /// Derived from `userAccountControl`; toggled through the tool layer,
    /// not through [`UserRepository::save`].
    pub enabled: bool,
}

impl DomainUser {
    pub fn new(account_name: impl Into<String>) -> Self {
        DomainUser {
            account_name: account_name.into(),
            enabled: true,
            ..Default::default()
        }
    }
}

pub struct UserRepository {
    directory: Arc<dyn Directory>,
    runner: Arc<dyn PrivilegedRunner>,
    filter: NameFilter,
    base_dn: String,
}

impl UserRepository {
    pub fn new(
        directory: Arc<dyn Directory>,
        runner: Arc<dyn PrivilegedRunner>,
        settings: &Settings,
    ) -> Result<Self> {
        Ok(UserRepository {
            directory,
            runner,
            filter: NameFilter::new(&settings.dns.excluded_names)?,
            base_dn: settings.directory.search_base(),
        })
    }

    pub fn find(&self, account_name: &str) -> Result<Option<DomainUser>> {
        if self.filter.is_excluded(account_name) {
            return Ok(None);
        }
        Ok(self.load_entry(account_name)?.map(user_from_entry))
    }

    fn load_entry(&self, account_name: &str) -> Result<Option<DirectoryEntry>> {
        let filter = format!(
            "(&(objectClass=user)(sAMAccountName={}))",
            escape_filter(account_name)
        );
        self.directory
            .find_one(&self.base_dn, SearchScope::Subtree, &filter, USER_ATTRS)
    }

    /// Apply the difference between `user` and the stored account: scalar
    /// attributes on the user entry, memberships as one `member` change per
    /// affected group. Returns the refreshed account.
    pub fn save(&self, user: &DomainUser) -> Result<DomainUser> {
        if self.filter.is_excluded(&user.account_name) {
            return Err(Error::excluded(&user.account_name));
        }
        let entry = self
            .load_entry(&user.account_name)?
            .ok_or_else(|| Error::not_found("user", &user.account_name))?;

        let mut changes = Vec::new();
        changes.extend(diff::diff_scalar(
            &entry,
            "displayName",
            user.display_name.as_deref(),
        ));
        changes.extend(diff::diff_scalar(&entry, "mail", user.mail.as_deref()));
        if !changes.is_empty() {
            self.directory.modify(&entry.dn, &changes)?;
        }

        // memberOf is computed by the server; membership changes are
        // applied to the `member` attribute of each affected group.
        for change in diff::diff_set(&entry, "memberOf", &user.groups) {
            match change {
                AttrChange::Add { values, .. } => {
                    for group_dn in &values {
                        self.directory
                            .modify(group_dn, &[AttrChange::add("member", &entry.dn)])?;
                    }
                }
                AttrChange::Remove { values, .. } => {
                    for group_dn in &values {
                        self.directory
                            .modify(group_dn, &[AttrChange::remove("member", &entry.dn)])?;
                    }
                }
                AttrChange::Replace { .. } => {}
            }
        }

        self.find(&user.account_name)?
            .ok_or_else(|| Error::not_found("user", &user.account_name))
    }

    /// Provision an account. Creation goes through the tool layer because
    /// the directory enforces password policy there; success is verified by
    /// re-reading the account.
    pub fn create(&self, account_name: &str, password: &str) -> Result<DomainUser> {
        if self.filter.is_excluded(account_name) {
            return Err(Error::excluded(account_name));
        }
        self.runner
            .run(&["user", "create", account_name, password])?;
        self.find(account_name)?.ok_or_else(|| {
            Error::tool(
                "samba-tool user create",
                format!("user '{}' absent after create", account_name),
            )
        })
    }

    /// Reset an account password. A password change is not observable by
    /// re-reading, so this is the one tool operation judged by exit code.
    pub fn set_password(&self, account_name: &str, password: &str) -> Result<()> {
        if self.filter.is_excluded(account_name) {
            return Err(Error::excluded(account_name));
        }
        if self.load_entry(account_name)?.is_none() {
            return Err(Error::not_found("user", account_name));
        }

        let newpassword = format!("--newpassword={}", password);
        let output = self
            .runner
            .run(&["user", "setpassword", account_name, &newpassword])?;
        if !output.success() {
            return Err(Error::tool(
                "samba-tool user setpassword",
                output.stderr.trim().to_string(),
            ));
        }
        Ok(())
    }

    /// Remove an account; `false` when it did not exist.
    pub fn delete(&self, account_name: &str) -> Result<bool> {
        if self.filter.is_excluded(account_name) {
            return Err(Error::excluded(account_name));
        }
        match self.load_entry(account_name)? {
            Some(entry) => {
                self.directory.delete(&entry.dn)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn user_from_entry(entry: DirectoryEntry) -> DomainUser {
    let uac: u32 = entry
        .first("userAccountControl")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    DomainUser {
        account_name: entry
            .first("sAMAccountName")
            .unwrap_or_default()
            .to_string(),
        display_name: entry.first("displayName").map(str::to_string),
        mail: entry.first("mail").map(str::to_string),
        groups: entry.values("memberOf").to_vec(),
        enabled: uac & UAC_DISABLED == 0,
        dn: entry.dn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DirectorySettings, DnsSettings, Settings, ToolSettings};
    use crate::ldap::testing::MemoryDirectory;
    use crate::runner::ToolOutput;

    const BASE: &str = "DC=example,DC=org";

    fn settings() -> Settings {
        Settings::new(
            DirectorySettings::new("dc1.example.org", "example.org", "Administrator", "secret"),
            DnsSettings::new("example.org", "dc1.example.org"),
            ToolSettings::new("administrator@EXAMPLE.ORG", "secret"),
        )
    }

    fn user_dn(cn: &str) -> String {
        format!("CN={},CN=Users,{}", cn, BASE)
    }

    fn group_dn(cn: &str) -> String {
        format!("CN={},CN=Users,{}", cn, BASE)
    }

    fn put_user(dir: &MemoryDirectory, account: &str, cn: &str, uac: &str, groups: &[&str]) {
        let mut entry = DirectoryEntry {
            dn: user_dn(cn),
            ..Default::default()
        };
        entry
            .attrs
            .insert("objectClass".to_string(), vec!["user".to_string()]);
        entry
            .attrs
            .insert("sAMAccountName".to_string(), vec![account.to_string()]);
        entry
            .attrs
            .insert("userAccountControl".to_string(), vec![uac.to_string()]);
        if !groups.is_empty() {
            entry.attrs.insert(
                "memberOf".to_string(),
                groups.iter().map(|g| group_dn(g)).collect(),
            );
        }
        dir.put(entry);
    }

    fn put_group(dir: &MemoryDirectory, cn: &str, members: &[&str]) {
        let mut entry = DirectoryEntry {
            dn: group_dn(cn),
            ..Default::default()
        };
        entry
            .attrs
            .insert("objectClass".to_string(), vec!["group".to_string()]);
        entry
            .attrs
            .insert("sAMAccountName".to_string(), vec![cn.to_string()]);
        entry.attrs.insert(
            "member".to_string(),
            members.iter().map(|m| user_dn(m)).collect(),
        );
        dir.put(entry);
    }

    /// Interprets `samba-tool user ...` against the in-memory directory.
    struct SimRunner {
        dir: Arc<MemoryDirectory>,
        fail_setpassword: bool,
    }

    impl PrivilegedRunner for SimRunner {
        fn authenticate(&self) -> Result<()> {
            Ok(())
        }

        fn run(&self, args: &[&str]) -> Result<ToolOutput> {
            let mut stderr = String::new();
            let mut exit_code = Some(0);
            match args {
                ["user", "create", name, _password] => {
                    put_user(&self.dir, name, name, "512", &[]);
                }
                ["user", "setpassword", _name, _newpassword] if self.fail_setpassword => {
                    stderr = "Password does not meet complexity requirements".to_string();
                    exit_code = Some(255);
                }
                _ => {}
            }
            Ok(ToolOutput {
                stdout: String::new(),
                stderr,
                exit_code,
            })
        }
    }

    fn fixture(fail_setpassword: bool) -> (Arc<MemoryDirectory>, UserRepository) {
        let dir = Arc::new(MemoryDirectory::new());
        let runner = Arc::new(SimRunner {
            dir: Arc::clone(&dir),
            fail_setpassword,
        });
        let repo = UserRepository::new(dir.clone() as Arc<dyn Directory>, runner, &settings()).unwrap();
        (dir, repo)
    }

    #[test]
    fn find_maps_entry_fields() {
        let (dir, repo) = fixture(false);
        put_user(&dir, "jdoe", "John Doe", "512", &["staff"]);

        let user = repo.find("jdoe").unwrap().unwrap();
        assert_eq!(user.account_name, "jdoe");
        assert_eq!(user.dn, user_dn("John Doe"));
        assert!(user.enabled);
        assert_eq!(user.groups, vec![group_dn("staff")]);

        assert!(repo.find("nobody").unwrap().is_none());
    }

    #[test]
    fn disabled_flag_comes_from_account_control() {
        let (dir, repo) = fixture(false);
        put_user(&dir, "jdoe", "John Doe", "514", &[]);
        assert!(!repo.find("jdoe").unwrap().unwrap().enabled);
    }

    #[test]
    fn save_diffs_scalars_and_membership() {
        let (dir, repo) = fixture(false);
        put_user(&dir, "jdoe", "John Doe", "512", &["staff"]);
        put_group(&dir, "staff", &["John Doe"]);
        put_group(&dir, "admins", &[]);

        let mut user = repo.find("jdoe").unwrap().unwrap();
        user.display_name = Some("John Doe".to_string());
        user.mail = Some("jdoe@example.org".to_string());
        user.groups = vec![group_dn("admins")];
        repo.save(&user).unwrap();

        let entry = dir.get(&user_dn("John Doe")).unwrap();
        assert_eq!(entry.first("mail"), Some("jdoe@example.org"));
        assert_eq!(entry.first("displayName"), Some("John Doe"));

        let staff = dir.get(&group_dn("staff")).unwrap();
        assert!(staff.values("member").is_empty());
        let admins = dir.get(&group_dn("admins")).unwrap();
        assert_eq!(admins.values("member"), [user_dn("John Doe")]);
    }

    #[test]
    fn save_missing_user_fails() {
        let (_dir, repo) = fixture(false);
        let err = repo.save(&DomainUser::new("ghost")).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "user", .. }));
    }

    #[test]
    fn create_goes_through_tool_and_verifies() {
        let (_dir, repo) = fixture(false);
        let user = repo.create("svc-backup", "S3cret!pw").unwrap();
        assert_eq!(user.account_name, "svc-backup");
        assert!(user.enabled);
    }

    #[test]
    fn set_password_reports_tool_failure() {
        let (dir, repo) = fixture(true);
        put_user(&dir, "jdoe", "John Doe", "512", &[]);

        let err = repo.set_password("jdoe", "weak").unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
        assert!(matches!(
            repo.set_password("ghost", "whatever").unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let (dir, repo) = fixture(false);
        put_user(&dir, "jdoe", "John Doe", "512", &[]);

        assert!(repo.delete("jdoe").unwrap());
        assert!(!repo.delete("jdoe").unwrap());
    }

    #[test]
    fn excluded_names_are_hidden_and_write_protected() {
        let (dir, repo) = fixture(false);
        put_user(&dir, "_svc-hidden", "_svc-hidden", "512", &[]);

        assert!(repo.find("_svc-hidden").unwrap().is_none());
        assert!(matches!(
            repo.create("_svc-new", "pw").unwrap_err(),
            Error::ExcludedName { .. }
        ));
        assert!(matches!(
            repo.delete("_svc-hidden").unwrap_err(),
            Error::ExcludedName { .. }
        ));
    }
}
