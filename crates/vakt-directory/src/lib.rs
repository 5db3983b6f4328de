//! Directory-authorization cache
//!
//! Resolves proxy-asserted identities against an LDAP/Active Directory
//! server and memoizes users and group memberships so repeated
//! authorization checks stay off the wire.
//!
//! Features:
//! - Trust-gated identity extraction from a proxy-injected header
//! - Startup connection check with optional mutual TLS
//! - Memoized per-user group membership lookups (one directory call per
//!   identity, no matter how many callers race)
//! - Group catalogue and multi-user intersection queries

pub mod connector;
pub mod ldap;
pub mod service;
pub mod tls;
pub mod trust;

pub use connector::{DirectoryConnector, DirectoryEntry, FindOptions};
pub use ldap::LdapConnector;
pub use service::{DirectoryService, SharedMembership, StoreSnapshot};
pub use trust::{IdentityRequest, TrustGate};
