//! Directory cache service
//!
//! Caches user records and group memberships fetched through the
//! [`DirectoryConnector`] so repeated authorization checks do not hit the
//! directory. Three stores: users (including cached "not found" misses),
//! the group catalogue, and one memoized membership lookup per account
//! name. Lookup failures are absorbed here and turned into empty results;
//! an authorization caller never sees a directory error.

use crate::connector::{DirectoryConnector, DirectoryEntry, FindOptions};
use crate::ldap::LdapConnector;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vakt_core::config::{AttributeNames, DirectorySettings};
use vakt_core::{Error, Result};

/// Catalogue query used when listing all groups.
const GROUP_CATALOGUE_QUERY: &str = "cn=*";

/// Memoized group-membership lookup. Clones of one handle share a single
/// underlying directory call and all resolve to the same sorted list of
/// group short-names. The handle never rejects; failures resolve to an
/// empty list.
pub type SharedMembership = Shared<BoxFuture<'static, Vec<String>>>;

type UserStore = HashMap<String, Option<DirectoryEntry>>;

pub struct DirectoryService {
    connector: Arc<dyn DirectoryConnector>,
    attributes: AttributeNames,
    check_query: Option<String>,
    users: Arc<Mutex<UserStore>>,
    groups: Mutex<BTreeSet<String>>,
    memberships: Mutex<HashMap<String, SharedMembership>>,
}

impl DirectoryService {
    /// Wires the service to a connector without touching the directory.
    /// Hosting processes should prefer [`DirectoryService::bootstrap`].
    pub fn new(connector: Arc<dyn DirectoryConnector>, settings: &DirectorySettings) -> Self {
        Self {
            connector,
            attributes: settings.attributes.clone(),
            check_query: settings.check_query.clone(),
            users: Arc::new(Mutex::new(HashMap::new())),
            groups: Mutex::new(BTreeSet::new()),
            memberships: Mutex::new(HashMap::new()),
        }
    }

    /// Build the LDAP connector and verify the directory answers before
    /// handing the service out. Errors from here are fatal: the hosting
    /// process must abort startup instead of serving with a broken
    /// directory link.
    pub async fn bootstrap(settings: &DirectorySettings) -> Result<Self> {
        let connector = LdapConnector::new(settings)?;
        let service = Self::new(Arc::new(connector), settings);
        service.check_connection().await?;
        Ok(service)
    }

    /// One bounded existence query against the directory.
    pub async fn check_connection(&self) -> Result<()> {
        let options = FindOptions {
            filter: self.check_query.clone(),
            size_limit: Some(1),
        };

        match self.connector.find(options).await {
            Ok(entries) if !entries.is_empty() => {
                info!("directory connection check succeeded");
                Ok(())
            }
            Ok(_) => Err(Error::Connection(
                "connection check returned no entries; check the directory settings and \
                 directory.check_query"
                    .into(),
            )),
            Err(e) => Err(Error::Connection(format!("connection check failed: {}", e))),
        }
    }

    /// Resolve a user record, serving from the cache when possible. A miss
    /// (user absent, or the directory failing) is cached as `None` so the
    /// same lookup is not repeated; only an invalid account name is an
    /// error, and that is never cached.
    pub async fn find_user(&self, identity: &str) -> Result<Option<DirectoryEntry>> {
        Self::lookup_user(self.connector.as_ref(), &self.users, identity).await
    }

    /// Whether the directory knows the account name. Valid means the
    /// record carries the canonical account-name attribute; the cached
    /// not-found sentinel therefore answers false.
    pub async fn is_user_valid(&self, identity: &str) -> Result<bool> {
        let record = self.find_user(identity).await?;
        let valid = record
            .map(|r| r.has(&self.attributes.account_name))
            .unwrap_or(false);

        debug!(
            "user {:?} is {}a valid directory user",
            identity,
            if valid { "" } else { "not " }
        );
        Ok(valid)
    }

    /// Memoized group membership for an account name.
    ///
    /// The first caller registers the lookup; every later caller, however
    /// concurrent, receives a clone of the same handle. Registration
    /// happens before this method returns and therefore strictly before
    /// the lookup's first suspension point, so two racing callers can
    /// never start two directory calls for one identity.
    pub fn group_membership_for_user(&self, identity: &str) -> SharedMembership {
        let identity = match normalize_identity(identity) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("refusing membership lookup: {}", e);
                let empty: SharedMembership = futures::future::ready(Vec::new()).boxed().shared();
                return empty;
            }
        };

        let mut memberships = self.memberships.lock();
        if let Some(existing) = memberships.get(&identity) {
            debug!("membership for {:?} served from the membership store", identity);
            return existing.clone();
        }

        debug!("no membership entry for {:?} yet; registering a lookup", identity);
        let lookup = Self::resolve_membership(
            Arc::clone(&self.connector),
            Arc::clone(&self.users),
            self.attributes.clone(),
            identity.clone(),
        )
        .boxed()
        .shared();

        memberships.insert(identity, lookup.clone());
        lookup
    }

    /// Fail-closed membership check: unknown users, unknown groups and
    /// directory failures all answer false. Only absent arguments are an
    /// error.
    pub async fn is_user_member_of(&self, identity: &str, group: &str) -> Result<bool> {
        let identity = normalize_identity(identity).map_err(|_| {
            Error::InvalidArgument("cannot check membership for an empty account name".into())
        })?;

        let group = group.trim();
        if group.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot check membership without a group name".into(),
            ));
        }

        let groups = self.group_membership_for_user(&identity).await;
        Ok(groups.iter().any(|g| g == group))
    }

    /// All known groups, fetched once and served from the catalogue cache
    /// afterwards. A fetch failure answers an empty list and leaves the
    /// cache untouched, so the next call retries.
    pub async fn available_groups(&self) -> Vec<String> {
        if self.groups.lock().is_empty() {
            match self.connector.find_groups(GROUP_CATALOGUE_QUERY).await {
                Ok(entries) => {
                    let names: BTreeSet<String> = entries
                        .iter()
                        .filter_map(|entry| entry.first(&self.attributes.group_name))
                        .map(str::to_owned)
                        .collect();

                    info!("group catalogue populated with {} groups", names.len());

                    let mut groups = self.groups.lock();
                    if groups.is_empty() {
                        *groups = names;
                    }
                }
                Err(e) => {
                    error!("failed to fetch the group catalogue: {}", e);
                    return Vec::new();
                }
            }
        }

        self.groups.lock().iter().cloned().collect()
    }

    /// Groups every listed account is a member of, preserving the first
    /// account's ordering. Memberships are fetched through the memoized
    /// lookups, all in flight at once.
    pub async fn common_groups_for_users<S: AsRef<str>>(
        &self,
        identities: &[S],
    ) -> Result<Vec<String>> {
        if identities.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot intersect group memberships without at least one account name".into(),
            ));
        }

        // Register every lookup first so duplicate identities share one
        // directory call, then await them together.
        let lookups: Vec<SharedMembership> = identities
            .iter()
            .map(|identity| self.group_membership_for_user(identity.as_ref()))
            .collect();
        let memberships = futures::future::join_all(lookups).await;

        let mut common = memberships.first().cloned().unwrap_or_default();
        for membership in &memberships[1..] {
            common.retain(|group| membership.contains(group));
        }

        Ok(common)
    }

    /// Clear all three stores. Membership handles already handed to
    /// callers still resolve to their captured result; the next lookup for
    /// any key starts from the directory again.
    pub fn flush_stores(&self) {
        debug!("flushing local cache stores");

        let mut users = self.users.lock();
        let mut groups = self.groups.lock();
        let mut memberships = self.memberships.lock();
        users.clear();
        groups.clear();
        memberships.clear();
    }

    /// Read-only projection of one store for operator tooling. Not part of
    /// the authorization path.
    pub async fn store_snapshot(&self, store: &str) -> Result<StoreSnapshot> {
        match store.to_ascii_lowercase().as_str() {
            "users" => Ok(StoreSnapshot::Users(self.users.lock().clone())),
            "groups" => Ok(StoreSnapshot::Groups(
                self.groups.lock().iter().cloned().collect(),
            )),
            "groupsperuser" => {
                // Clone the handles out first; awaiting with the lock held
                // would block the registration path.
                let handles: Vec<(String, SharedMembership)> = self
                    .memberships
                    .lock()
                    .iter()
                    .map(|(identity, lookup)| (identity.clone(), lookup.clone()))
                    .collect();

                let mut resolved = HashMap::with_capacity(handles.len());
                for (identity, lookup) in handles {
                    resolved.insert(identity, lookup.await);
                }
                Ok(StoreSnapshot::GroupsPerUser(resolved))
            }
            other => Err(Error::InvalidArgument(format!(
                "unknown store {:?}; expected users, groups or groupsperuser",
                other
            ))),
        }
    }

    async fn lookup_user(
        connector: &dyn DirectoryConnector,
        users: &Mutex<UserStore>,
        identity: &str,
    ) -> Result<Option<DirectoryEntry>> {
        let identity = normalize_identity(identity)?;

        {
            let cache = users.lock();
            if let Some(cached) = cache.get(&identity) {
                debug!("user {:?} served from the user store", identity);
                return Ok(cached.clone());
            }
        }

        debug!("looking up user {:?} in the directory", identity);
        let record = match connector.find_user(&identity).await {
            Ok(Some(entry)) => Some(entry),
            Ok(None) => {
                warn!("user {:?} not found in the directory; caching the miss", identity);
                None
            }
            Err(e) => {
                error!(
                    "directory lookup for user {:?} failed: {}; caching the miss",
                    identity, e
                );
                None
            }
        };

        // A concurrent lookup may have won the race; the first entry for a
        // key sticks until a flush.
        let entry = users.lock().entry(identity).or_insert(record).clone();
        Ok(entry)
    }

    async fn resolve_membership(
        connector: Arc<dyn DirectoryConnector>,
        users: Arc<Mutex<UserStore>>,
        attributes: AttributeNames,
        identity: String,
    ) -> Vec<String> {
        let resolved: Result<Vec<String>> = async {
            let record = Self::lookup_user(connector.as_ref(), &users, &identity)
                .await?
                .ok_or_else(|| {
                    Error::NotFound(format!("user {} not found in the directory", identity))
                })?;

            let principal = record
                .first(&attributes.principal_name)
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "user {} has no {} attribute",
                        identity, attributes.principal_name
                    ))
                })?
                .to_owned();

            let entries = connector.group_membership(&principal).await?;

            let mut groups: Vec<String> = entries
                .iter()
                .filter_map(|entry| entry.first(&attributes.group_name))
                .map(str::to_owned)
                .collect();
            groups.sort();
            Ok(groups)
        }
        .await;

        match resolved {
            Ok(groups) => {
                debug!("membership for {:?} resolved to {} groups", identity, groups.len());
                groups
            }
            Err(e) => {
                // No groups to resolve with, but the entry must still
                // settle so membership checks answer "not a member".
                error!("membership lookup for {:?} failed: {}", identity, e);
                Vec::new()
            }
        }
    }
}

/// Serializable view of one cache store.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StoreSnapshot {
    /// Account name to record, `null` for a cached not-found miss
    Users(HashMap<String, Option<DirectoryEntry>>),
    /// Sorted group catalogue
    Groups(Vec<String>),
    /// Account name to resolved membership list
    GroupsPerUser(HashMap<String, Vec<String>>),
}

fn normalize_identity(identity: &str) -> Result<String> {
    let trimmed = identity.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument(
            "an empty string is not a valid account name".into(),
        ));
    }
    Ok(trimmed.to_owned())
}
