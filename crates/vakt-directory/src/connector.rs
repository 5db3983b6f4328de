//! Directory connector capability
//!
//! The seam between the cache service and the wire protocol. The service
//! is written only against this trait; [`crate::ldap::LdapConnector`]
//! implements it over ldap3 and tests substitute an in-memory mock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vakt_core::Result;

/// One directory object: its DN plus the requested attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// First value of an attribute, if present.
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.attributes
            .get(attribute)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Structural presence check for an attribute.
    pub fn has(&self, attribute: &str) -> bool {
        self.attributes.contains_key(attribute)
    }
}

/// Options for a bounded existence query.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Raw search filter; unset asks for anything.
    pub filter: Option<String>,

    /// Cap on the number of returned entries.
    pub size_limit: Option<i32>,
}

/// Asynchronous, fallible lookup primitives of the external directory.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Bounded lookup used by the startup connection check.
    async fn find(&self, options: FindOptions) -> Result<Vec<DirectoryEntry>>;

    /// Look up a single user by account name. `Ok(None)` when absent.
    async fn find_user(&self, account_name: &str) -> Result<Option<DirectoryEntry>>;

    /// List group objects matching a catalogue query such as `cn=*`.
    async fn find_groups(&self, query: &str) -> Result<Vec<DirectoryEntry>>;

    /// Groups the named principal is a member of.
    async fn group_membership(&self, principal_name: &str) -> Result<Vec<DirectoryEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_attribute_access() {
        let mut attributes = HashMap::new();
        attributes.insert(
            "sAMAccountName".to_string(),
            vec!["jdoe".to_string(), "jdoe2".to_string()],
        );

        let entry = DirectoryEntry {
            dn: "CN=John Doe,DC=example,DC=test".to_string(),
            attributes,
        };

        assert_eq!(entry.first("sAMAccountName"), Some("jdoe"));
        assert!(entry.has("sAMAccountName"));
        assert_eq!(entry.first("mail"), None);
        assert!(!entry.has("mail"));
    }
}
