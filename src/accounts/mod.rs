//! Domain account management: users and groups.
//!
//! Reads go straight to LDAP; attribute changes are applied as minimal
//! diffs so unrelated values (large member lists in particular) are never
//! rewritten. Provisioning operations AD gates behind password policy
//! (user create, password reset, group add) run through the privileged
//! tool layer.

pub mod groups;
pub mod users;

pub use groups::{DomainGroup, GroupRepository};
pub use users::{DomainUser, UserRepository};
