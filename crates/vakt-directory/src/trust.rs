//! Trust gate: caller identity from a proxy-injected header
//!
//! Deployment model: an authenticating reverse proxy is the only component
//! reachable from outside. The proxy asserts the authenticated account
//! name in a request header, and this gate only honors that header when
//! the request's source address is on the trusted-proxy allowlist.

use std::net::IpAddr;
use tracing::{debug, warn};
use vakt_core::config::VaktConfig;
use vakt_core::{Error, Result};

/// Minimal view of an incoming request. Implement this for whatever
/// request type the hosting process uses.
pub trait IdentityRequest {
    /// Source address of the immediate peer. This must be the last hop,
    /// not a forwarded-for value: only the last hop can vouch for the
    /// trusted header.
    fn remote_addr(&self) -> Option<IpAddr>;

    /// Value of a request header, if present.
    fn header(&self, name: &str) -> Option<&str>;
}

pub struct TrustGate {
    enabled: bool,
    trusted_header: String,
    allowlist: Vec<IpAddr>,
    identity_override: Option<String>,
}

impl TrustGate {
    /// Fails with `Error::Configuration` when an allowlist entry is not a
    /// valid IP address; a typo there should surface at startup, not as a
    /// silently narrower allowlist.
    pub fn new(config: &VaktConfig) -> Result<Self> {
        let mut allowlist = Vec::new();
        for entry in &config.trust.trusted_proxies {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let addr: IpAddr = entry.parse().map_err(|_| {
                Error::Configuration(format!(
                    "trust.trusted_proxies entry {:?} is not a valid IP address",
                    entry
                ))
            })?;
            allowlist.push(addr);
        }

        let identity_override = config
            .trust
            .identity_override
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned);

        Ok(Self {
            enabled: config.directory.enabled,
            trusted_header: config.trust.trusted_header.clone(),
            allowlist,
            identity_override,
        })
    }

    /// Account name asserted by the request, or `None` when directory
    /// lookups are disabled or the header is missing. Fails with
    /// `Error::UntrustedSource` when the source is not an allowed proxy.
    pub fn identity<R: IdentityRequest>(&self, request: &R) -> Result<Option<String>> {
        if !self.enabled {
            return Ok(None);
        }

        if let Some(ref identity) = self.identity_override {
            warn!(
                "trust.identity_override is set; using {:?} as the account name for every \
                 request. NEVER enable this in production!",
                identity
            );
            return Ok(Some(identity.clone()));
        }

        let source = request.remote_addr();
        if self.allowlist.is_empty() {
            warn!(
                "directory lookups are active but no trusted-proxy allowlist is configured; \
                 the {} header is honored from ANY source, which is a security risk",
                self.trusted_header
            );
        } else {
            let allowed = source
                .map(|addr| self.allowlist.contains(&addr))
                .unwrap_or(false);
            if !allowed {
                let shown = source
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                warn!("rejecting request from untrusted source {}", shown);
                return Err(Error::UntrustedSource(shown));
            }
        }

        let value = match request.header(&self.trusted_header) {
            Some(value) => value,
            None => {
                debug!("header {} missing; no identity asserted", self.trusted_header);
                return Ok(None);
            }
        };

        // The proxy may assert DOMAIN\account; only the trailing account
        // name is a directory key.
        let identity = match value.rfind('\\') {
            Some(pos) => &value[pos + 1..],
            None => value,
        };

        debug!("request from trusted source asserted identity {:?}", identity);
        Ok(Some(identity.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeRequest {
        remote: Option<IpAddr>,
        headers: HashMap<String, String>,
    }

    impl FakeRequest {
        fn new(remote: Option<&str>, identity_header: Option<&str>) -> Self {
            let mut headers = HashMap::new();
            if let Some(value) = identity_header {
                headers.insert("X-Control-Header".to_string(), value.to_string());
            }
            Self {
                remote: remote.map(|addr| addr.parse().unwrap()),
                headers,
            }
        }
    }

    impl IdentityRequest for FakeRequest {
        fn remote_addr(&self) -> Option<IpAddr> {
            self.remote
        }

        fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).map(String::as_str)
        }
    }

    fn config(proxies: &[&str]) -> VaktConfig {
        let mut config = VaktConfig::default();
        config.directory.enabled = true;
        config.trust.trusted_proxies = proxies.iter().map(|s| s.to_string()).collect();
        config
    }

    #[test]
    fn disabled_lookup_asserts_nothing() {
        let mut disabled = config(&[]);
        disabled.directory.enabled = false;
        let gate = TrustGate::new(&disabled).unwrap();

        let request = FakeRequest::new(Some("10.0.0.1"), Some("jdoe"));
        assert_eq!(gate.identity(&request).unwrap(), None);
    }

    #[test]
    fn empty_allowlist_accepts_any_source() {
        let gate = TrustGate::new(&config(&[])).unwrap();

        let request = FakeRequest::new(Some("192.0.2.9"), Some("jdoe"));
        assert_eq!(gate.identity(&request).unwrap().as_deref(), Some("jdoe"));
    }

    #[test]
    fn domain_prefix_is_stripped() {
        let gate = TrustGate::new(&config(&[])).unwrap();

        let request = FakeRequest::new(Some("10.0.0.1"), Some("CORP\\jdoe"));
        assert_eq!(gate.identity(&request).unwrap().as_deref(), Some("jdoe"));
    }

    #[test]
    fn untrusted_source_is_rejected() {
        let gate = TrustGate::new(&config(&["10.0.0.1"])).unwrap();

        let request = FakeRequest::new(Some("192.0.2.9"), Some("CORP\\jdoe"));
        assert!(matches!(
            gate.identity(&request),
            Err(Error::UntrustedSource(_))
        ));

        // A request with no source address cannot be vouched for either.
        let unknown = FakeRequest::new(None, Some("jdoe"));
        assert!(matches!(
            gate.identity(&unknown),
            Err(Error::UntrustedSource(_))
        ));
    }

    #[test]
    fn trusted_source_passes() {
        let gate = TrustGate::new(&config(&["10.0.0.1", "10.0.0.2"])).unwrap();

        let request = FakeRequest::new(Some("10.0.0.2"), Some("jdoe"));
        assert_eq!(gate.identity(&request).unwrap().as_deref(), Some("jdoe"));
    }

    #[test]
    fn missing_header_is_absent() {
        let gate = TrustGate::new(&config(&["10.0.0.1"])).unwrap();

        let request = FakeRequest::new(Some("10.0.0.1"), None);
        assert_eq!(gate.identity(&request).unwrap(), None);
    }

    #[test]
    fn override_wins_over_everything() {
        let mut overridden = config(&["10.0.0.1"]);
        overridden.trust.identity_override = Some("dev-user".to_string());
        let gate = TrustGate::new(&overridden).unwrap();

        // Even an untrusted source gets the override identity.
        let request = FakeRequest::new(Some("192.0.2.9"), None);
        assert_eq!(gate.identity(&request).unwrap().as_deref(), Some("dev-user"));
    }

    #[test]
    fn malformed_allowlist_entry_fails_construction() {
        assert!(matches!(
            TrustGate::new(&config(&["not-an-ip"])),
            Err(Error::Configuration(_))
        ));
    }
}
