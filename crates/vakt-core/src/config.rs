//! Configuration for Vakt

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaktConfig {
    #[serde(default)]
    pub directory: DirectorySettings,

    #[serde(default)]
    pub trust: TrustSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for VaktConfig {
    fn default() -> Self {
        Self {
            directory: DirectorySettings::default(),
            trust: TrustSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl VaktConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Configuration(format!("failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::Error::Configuration(format!("failed to parse config file {}: {}", path, e))
        })
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(enabled) = std::env::var("VAKT_DIRECTORY_ENABLED") {
            config.directory.enabled = enabled == "true";
        }
        if let Ok(url) = std::env::var("VAKT_DIRECTORY_URL") {
            config.directory.url = url;
        }
        if let Ok(base_dn) = std::env::var("VAKT_DIRECTORY_BASE_DN") {
            config.directory.base_dn = base_dn;
        }
        if let Ok(user) = std::env::var("VAKT_DIRECTORY_BIND_USER") {
            config.directory.bind_user = user;
        }
        if let Ok(password) = std::env::var("VAKT_DIRECTORY_BIND_PASSWORD") {
            config.directory.bind_password = password;
        }
        if let Ok(secs) = std::env::var("VAKT_DIRECTORY_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse() {
                config.directory.timeout_seconds = s;
            }
        }
        if let Ok(query) = std::env::var("VAKT_DIRECTORY_CHECK_QUERY") {
            config.directory.check_query = Some(query);
        }

        // TLS client material from environment
        if let Ok(key) = std::env::var("VAKT_DIRECTORY_TLS_KEY") {
            config.directory.tls.key_file = Some(PathBuf::from(key));
        }
        if let Ok(cert) = std::env::var("VAKT_DIRECTORY_TLS_CERT") {
            config.directory.tls.cert_file = Some(PathBuf::from(cert));
        }
        if let Ok(ca) = std::env::var("VAKT_DIRECTORY_TLS_CA") {
            config.directory.tls.ca_file = Some(PathBuf::from(ca));
        }
        if let Ok(passphrase) = std::env::var("VAKT_DIRECTORY_TLS_PASSPHRASE") {
            config.directory.tls.passphrase = Some(passphrase);
        }

        if let Ok(header) = std::env::var("VAKT_TRUSTED_HEADER") {
            config.trust.trusted_header = header;
        }
        if let Ok(ips) = std::env::var("VAKT_TRUSTED_PROXY_IPS") {
            config.trust.trusted_proxies = ips
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Ok(identity) = std::env::var("VAKT_IDENTITY_OVERRIDE") {
            config.trust.identity_override = Some(identity);
        }
        if let Ok(level) = std::env::var("VAKT_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }
}

/// Directory server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySettings {
    /// Enable directory lookups. When false the trust gate never asserts
    /// an identity and the cache service is not constructed.
    #[serde(default)]
    pub enabled: bool,

    /// Directory server URL (ldap:// or ldaps://)
    #[serde(default)]
    pub url: String,

    /// Base distinguished name for all searches
    #[serde(default)]
    pub base_dn: String,

    /// Service account used to bind
    #[serde(default)]
    pub bind_user: String,

    /// Service account password
    #[serde(default)]
    pub bind_password: String,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Optional filter for the startup existence query. Unset asks the
    /// directory for anything, limited to a single result.
    #[serde(default)]
    pub check_query: Option<String>,

    #[serde(default)]
    pub tls: DirectoryTlsSettings,

    #[serde(default)]
    pub attributes: AttributeNames,
}

fn default_timeout() -> u64 {
    10
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            base_dn: String::new(),
            bind_user: String::new(),
            bind_password: String::new(),
            timeout_seconds: default_timeout(),
            check_query: None,
            tls: DirectoryTlsSettings::default(),
            attributes: AttributeNames::default(),
        }
    }
}

impl DirectorySettings {
    /// Checks the four settings every connection needs. Failing this is
    /// fatal at bootstrap.
    pub fn validate(&self) -> crate::Result<()> {
        let mut missing = Vec::new();
        if self.url.trim().is_empty() {
            missing.push("directory.url");
        }
        if self.base_dn.trim().is_empty() {
            missing.push("directory.base_dn");
        }
        if self.bind_user.trim().is_empty() {
            missing.push("directory.bind_user");
        }
        if self.bind_password.is_empty() {
            missing.push("directory.bind_password");
        }
        if !missing.is_empty() {
            return Err(crate::Error::Configuration(format!(
                "missing required directory settings: {}; set directory.enabled = false to run without lookups",
                missing.join(", ")
            )));
        }

        if !self.url.starts_with("ldap://") && !self.url.starts_with("ldaps://") {
            return Err(crate::Error::Configuration(format!(
                "directory.url must start with ldap:// or ldaps://, got {}",
                self.url
            )));
        }

        Ok(())
    }

    /// True when the URL asks for a secure transport.
    pub fn wants_secure_transport(&self) -> bool {
        self.url.starts_with("ldaps://")
    }
}

/// Client TLS material for LDAPS connections.
///
/// Either none of the three paths is set (no client TLS) or all three must
/// point at readable files; anything in between is rejected at bootstrap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryTlsSettings {
    /// Path to the client private key (PEM)
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Path to the client certificate (PEM)
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// Path to the CA certificate (PEM)
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Passphrase for an encrypted key. Rejected when set: rustls only
    /// accepts decrypted keys.
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl DirectoryTlsSettings {
    /// True when at least one of the three file paths is set.
    pub fn is_configured(&self) -> bool {
        self.key_file.is_some() || self.cert_file.is_some() || self.ca_file.is_some()
    }
}

/// Names of the directory attributes the cache reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeNames {
    /// Canonical account-name attribute; its presence marks a valid user
    #[serde(default = "default_account_name_attr")]
    pub account_name: String,

    /// Principal-name attribute used for membership queries
    #[serde(default = "default_principal_name_attr")]
    pub principal_name: String,

    /// Group short-name attribute
    #[serde(default = "default_group_name_attr")]
    pub group_name: String,
}

fn default_account_name_attr() -> String {
    "sAMAccountName".to_string()
}

fn default_principal_name_attr() -> String {
    "userPrincipalName".to_string()
}

fn default_group_name_attr() -> String {
    "cn".to_string()
}

impl Default for AttributeNames {
    fn default() -> Self {
        Self {
            account_name: default_account_name_attr(),
            principal_name: default_principal_name_attr(),
            group_name: default_group_name_attr(),
        }
    }
}

/// Trust gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustSettings {
    /// Header carrying the proxy-asserted account name
    #[serde(default = "default_trusted_header")]
    pub trusted_header: String,

    /// Source addresses allowed to assert the trusted header. An empty
    /// list accepts any source, which the trust gate warns about.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    /// Development-only identity override. Never set this in production.
    #[serde(default)]
    pub identity_override: Option<String>,
}

fn default_trusted_header() -> String {
    crate::DEFAULT_TRUSTED_HEADER.to_string()
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            trusted_header: default_trusted_header(),
            trusted_proxies: Vec::new(),
            identity_override: None,
        }
    }
}

/// Logging section consumed by the hosting process when it initializes its
/// tracing subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_directory() -> DirectorySettings {
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
    fn defaults() {
        let config = VaktConfig::default();
        assert_eq!(config.trust.trusted_header, "X-Control-Header");
        assert!(config.trust.trusted_proxies.is_empty());
        assert_eq!(config.directory.timeout_seconds, 10);
        assert_eq!(config.directory.attributes.account_name, "sAMAccountName");
        assert_eq!(config.directory.attributes.principal_name, "userPrincipalName");
        assert_eq!(config.directory.attributes.group_name, "cn");
        assert!(!config.directory.tls.is_configured());
    }

    #[test]
    fn validate_reports_missing_settings() {
        let err = DirectorySettings::default().validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("directory.url"));
        assert!(message.contains("directory.bind_password"));

        assert!(valid_directory().validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_scheme() {
        let mut settings = valid_directory();
        settings.url = "http://directory.example.test".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn secure_transport_follows_the_scheme() {
        let mut settings = valid_directory();
        assert!(!settings.wants_secure_transport());
        settings.url = "ldaps://directory.example.test:636".to_string();
        assert!(settings.wants_secure_transport());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: VaktConfig = toml::from_str(
            r#"
            [directory]
            enabled = true
            url = "ldaps://dc01.example.test:636"
            base_dn = "DC=example,DC=test"
            bind_user = "svc-vakt"
            bind_password = "secret"

            [trust]
            trusted_proxies = ["10.0.0.1", "10.0.0.2"]
            "#,
        )
        .unwrap();

        assert!(config.directory.enabled);
        assert_eq!(config.directory.timeout_seconds, 10);
        assert_eq!(config.trust.trusted_header, "X-Control-Header");
        assert_eq!(config.trust.trusted_proxies.len(), 2);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn from_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vakt.toml");
        std::fs::write(
            &path,
            "[directory]\nurl = \"ldap://dc01.example.test\"\n\n[logging]\nlevel = \"debug\"\nformat = \"json\"\n",
        )
        .unwrap();

        let config = VaktConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.directory.url, "ldap://dc01.example.test");
        assert_eq!(config.logging.level, "debug");

        assert!(VaktConfig::from_file("/nonexistent/vakt.toml").is_err());
    }

    #[test]
    fn from_env_overrides() {
        std::env::set_var("VAKT_DIRECTORY_ENABLED", "true");
        std::env::set_var("VAKT_DIRECTORY_URL", "ldaps://dc01.example.test:636");
        std::env::set_var("VAKT_TRUSTED_PROXY_IPS", "10.0.0.1, 10.0.0.2,");
        std::env::set_var("VAKT_IDENTITY_OVERRIDE", "dev-user");

        let config = VaktConfig::from_env();
        assert!(config.directory.enabled);
        assert_eq!(config.directory.url, "ldaps://dc01.example.test:636");
        assert_eq!(
            config.trust.trusted_proxies,
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
        );
        assert_eq!(config.trust.identity_override.as_deref(), Some("dev-user"));

        std::env::remove_var("VAKT_DIRECTORY_ENABLED");
        std::env::remove_var("VAKT_DIRECTORY_URL");
        std::env::remove_var("VAKT_TRUSTED_PROXY_IPS");
        std::env::remove_var("VAKT_IDENTITY_OVERRIDE");
    }
}
