//! LDAP directory connector
//!
//! Implements the [`DirectoryConnector`] capability over ldap3. Each
//! operation opens its own connection, binds with the service account and
//! unbinds when done.

use crate::connector::{DirectoryConnector, DirectoryEntry, FindOptions};
use crate::tls;
use async_trait::async_trait;
use ldap3::{
    ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchOptions,
    SearchResult,
};
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use vakt_core::config::DirectorySettings;
use vakt_core::{Error, Result};

/// Result code the server answers with when a size-limited search has more
/// matches than the limit. Expected for the bounded existence query.
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;

pub struct LdapConnector {
    settings: DirectorySettings,
    tls_config: Option<Arc<ClientConfig>>,
}

impl LdapConnector {
    /// Validates the settings and assembles the optional client TLS
    /// material. Fails with `Error::Configuration` on missing base
    /// settings or partial TLS material; both abort bootstrap.
    pub fn new(settings: &DirectorySettings) -> Result<Self> {
        settings.validate()?;

        let tls_config =
            tls::client_tls_config(&settings.tls, settings.wants_secure_transport())?;

        Ok(Self {
            settings: settings.clone(),
            tls_config,
        })
    }

    /// Open a connection and bind with the service account.
    async fn open(&self) -> Result<Ldap> {
        let mut conn_settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(self.settings.timeout_seconds));
        if let Some(ref tls_config) = self.tls_config {
            conn_settings = conn_settings.set_config(Arc::clone(tls_config));
        }

        debug!("connecting to directory at {}", self.settings.url);

        let (conn, mut ldap) = LdapConnAsync::with_settings(conn_settings, &self.settings.url)
            .await
            .map_err(|e| {
                Error::Connection(format!("failed to connect to {}: {}", self.settings.url, e))
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!("LDAP connection error: {}", e);
            }
        });

        let bind = ldap
            .simple_bind(&self.settings.bind_user, &self.settings.bind_password)
            .await
            .map_err(|e| Error::Connection(format!("bind failed: {}", e)))?;

        if bind.rc != 0 {
            return Err(Error::Connection(format!(
                "bind as {} failed with result code {}",
                self.settings.bind_user, bind.rc
            )));
        }

        Ok(ldap)
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn find(&self, options: FindOptions) -> Result<Vec<DirectoryEntry>> {
        let mut ldap = self.open().await?;

        if let Some(limit) = options.size_limit {
            ldap.with_search_options(SearchOptions::new().sizelimit(limit));
        }

        let filter = options.filter.as_deref().unwrap_or("(objectClass=*)");
        let SearchResult(rs, res) = ldap
            .search(&self.settings.base_dn, Scope::Subtree, filter, vec!["cn"])
            .await
            .map_err(|e| Error::Directory(format!("search failed: {}", e)))?;

        let _ = ldap.unbind().await;

        // A truncated result is fine here: the query only probes existence.
        if res.rc != 0 && res.rc != RC_SIZE_LIMIT_EXCEEDED {
            return Err(Error::Directory(format!(
                "search failed with result code {}: {}",
                res.rc, res.text
            )));
        }

        Ok(rs
            .into_iter()
            .map(|entry| to_entry(SearchEntry::construct(entry)))
            .collect())
    }

    async fn find_user(&self, account_name: &str) -> Result<Option<DirectoryEntry>> {
        let mut ldap = self.open().await?;

        let filter = attribute_filter(&self.settings.attributes.account_name, account_name);
        debug!("searching for user with filter {}", filter);

        let (rs, _res) = ldap
            .search(&self.settings.base_dn, Scope::Subtree, &filter, vec!["*"])
            .await
            .map_err(|e| Error::Directory(format!("user search failed: {}", e)))?
            .success()
            .map_err(|e| Error::Directory(format!("user search error: {}", e)))?;

        let _ = ldap.unbind().await;

        Ok(rs
            .into_iter()
            .next()
            .map(|entry| to_entry(SearchEntry::construct(entry))))
    }

    async fn find_groups(&self, query: &str) -> Result<Vec<DirectoryEntry>> {
        let mut ldap = self.open().await?;

        let filter = group_filter(query);
        debug!("searching for groups with filter {}", filter);

        let (rs, _res) = ldap
            .search(
                &self.settings.base_dn,
                Scope::Subtree,
                &filter,
                vec![self.settings.attributes.group_name.as_str()],
            )
            .await
            .map_err(|e| Error::Directory(format!("group search failed: {}", e)))?
            .success()
            .map_err(|e| Error::Directory(format!("group search error: {}", e)))?;

        let _ = ldap.unbind().await;

        Ok(rs
            .into_iter()
            .map(|entry| to_entry(SearchEntry::construct(entry)))
            .collect())
    }

    async fn group_membership(&self, principal_name: &str) -> Result<Vec<DirectoryEntry>> {
        let mut ldap = self.open().await?;

        // Membership is recorded against the member DN, so resolve the
        // principal first.
        let filter = attribute_filter(&self.settings.attributes.principal_name, principal_name);
        let (rs, _res) = ldap
            .search(&self.settings.base_dn, Scope::Subtree, &filter, vec!["cn"])
            .await
            .map_err(|e| Error::Directory(format!("principal search failed: {}", e)))?
            .success()
            .map_err(|e| Error::Directory(format!("principal search error: {}", e)))?;

        let user_dn = match rs.into_iter().next() {
            Some(entry) => SearchEntry::construct(entry).dn,
            None => {
                let _ = ldap.unbind().await;
                return Err(Error::NotFound(format!(
                    "principal {} not found",
                    principal_name
                )));
            }
        };

        let filter = member_filter(&user_dn);
        debug!("searching group membership with filter {}", filter);

        let (rs, _res) = ldap
            .search(
                &self.settings.base_dn,
                Scope::Subtree,
                &filter,
                vec![self.settings.attributes.group_name.as_str()],
            )
            .await
            .map_err(|e| Error::Directory(format!("membership search failed: {}", e)))?
            .success()
            .map_err(|e| Error::Directory(format!("membership search error: {}", e)))?;

        let _ = ldap.unbind().await;

        Ok(rs
            .into_iter()
            .map(|entry| to_entry(SearchEntry::construct(entry)))
            .collect())
    }
}

/// Equality filter with the value escaped.
fn attribute_filter(attribute: &str, value: &str) -> String {
    format!("({}={})", attribute, ldap_escape(value))
}

/// Group objects matching a raw catalogue query such as `cn=*`.
fn group_filter(query: &str) -> String {
    format!("(&(objectClass=group)({}))", query)
}

/// Groups a DN is a transitive member of (LDAP_MATCHING_RULE_IN_CHAIN, so
/// nested groups are included).
fn member_filter(dn: &str) -> String {
    format!("(member:1.2.840.113556.1.4.1941:={})", ldap_escape(dn))
}

fn to_entry(entry: SearchEntry) -> DirectoryEntry {
    DirectoryEntry {
        dn: entry.dn,
        attributes: entry.attrs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vakt_core::config::DirectoryTlsSettings;

    fn settings() -> DirectorySettings {
        DirectorySettings {
            enabled: true,
            url: "ldap://directory.example.test:389".to_string(),
            base_dn: "DC=example,DC=test".to_string(),
            bind_user: "svc-vakt".to_string(),
            bind_password: "secret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn filters_escape_their_values() {
        assert_eq!(
            attribute_filter("sAMAccountName", "jd(oe)"),
            r"(sAMAccountName=jd\28oe\29)"
        );
        assert_eq!(group_filter("cn=*"), "(&(objectClass=group)(cn=*))");
        assert_eq!(
            member_filter("CN=John Doe,DC=example,DC=test"),
            "(member:1.2.840.113556.1.4.1941:=CN=John Doe,DC=example,DC=test)"
        );
    }

    #[test]
    fn construction_validates_settings() {
        assert!(LdapConnector::new(&settings()).is_ok());

        assert!(matches!(
            LdapConnector::new(&DirectorySettings::default()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn construction_rejects_partial_tls() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("client.key");
        std::fs::write(&key, "placeholder").unwrap();

        let mut with_partial_tls = settings();
        with_partial_tls.tls = DirectoryTlsSettings {
            key_file: Some(key),
            cert_file: None,
            ca_file: None,
            passphrase: None,
        };

        assert!(matches!(
            LdapConnector::new(&with_partial_tls),
            Err(Error::Configuration(_))
        ));
    }
}
