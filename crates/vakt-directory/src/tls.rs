//! Client TLS material for LDAPS connections
//!
//! Activation policy: either none of the key/cert/CA paths is configured
//! (no client TLS) or all three must point at readable PEM files. Partial
//! material is a misconfiguration and fails bootstrap.

use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use vakt_core::config::DirectoryTlsSettings;
use vakt_core::{Error, Result};

/// Assemble the rustls client configuration for the connector, or `None`
/// when no client TLS material is configured.
pub fn client_tls_config(
    settings: &DirectoryTlsSettings,
    secure_url: bool,
) -> Result<Option<Arc<ClientConfig>>> {
    let paths = [
        ("directory.tls.key_file", settings.key_file.as_deref()),
        ("directory.tls.cert_file", settings.cert_file.as_deref()),
        ("directory.tls.ca_file", settings.ca_file.as_deref()),
    ];

    if paths.iter().all(|(_, path)| path.is_none()) {
        if secure_url {
            warn!(
                "directory URL uses a secure scheme but no TLS client material is configured; \
                 check the directory.tls settings if this is unintended"
            );
        }
        return Ok(None);
    }

    // At least one path is set, so all three must be set and readable.
    let mut resolved = Vec::with_capacity(3);
    for (name, path) in paths {
        match path {
            Some(path) if is_readable_file(path) => resolved.push(path),
            Some(path) => {
                return Err(Error::Configuration(format!(
                    "{} is not a readable file: {}",
                    name,
                    path.display()
                )));
            }
            None => {
                return Err(Error::Configuration(format!(
                    "partial TLS configuration: {} is missing while other directory.tls files are set",
                    name
                )));
            }
        }
    }

    if settings.passphrase.is_some() {
        return Err(Error::Configuration(
            "encrypted private keys are not supported; provide a decrypted key and unset \
             directory.tls.passphrase"
                .into(),
        ));
    }

    let (key_path, cert_path, ca_path) = (resolved[0], resolved[1], resolved[2]);

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let ca_certs = load_certs(ca_path)?;

    let mut roots = RootCertStore::empty();
    for cert in &ca_certs {
        roots.add(cert).map_err(|e| {
            Error::Configuration(format!(
                "invalid CA certificate in {}: {}",
                ca_path.display(),
                e
            ))
        })?;
    }

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| Error::Configuration(format!("TLS client setup failed: {}", e)))?;

    info!("client TLS material loaded; connecting with a client certificate");
    Ok(Some(Arc::new(config)))
}

fn is_readable_file(path: &Path) -> bool {
    File::open(path).is_ok()
}

/// Load certificates from a PEM file
fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
    let file = File::open(path).map_err(|e| {
        Error::Configuration(format!(
            "failed to open certificate file {}: {}",
            path.display(),
            e
        ))
    })?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader).map_err(|e| {
        Error::Configuration(format!(
            "failed to parse certificates in {}: {}",
            path.display(),
            e
        ))
    })?;

    if certs.is_empty() {
        return Err(Error::Configuration(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    Ok(certs.into_iter().map(Certificate).collect())
}

/// Load a private key from a PEM file
fn load_private_key(path: &Path) -> Result<PrivateKey> {
    let file = File::open(path).map_err(|e| {
        Error::Configuration(format!("failed to open key file {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);

    // Try different key formats
    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::RSAKey(key)))
            | Ok(Some(rustls_pemfile::Item::PKCS8Key(key)))
            | Ok(Some(rustls_pemfile::Item::ECKey(key))) => {
                return Ok(PrivateKey(key));
            }
            Ok(Some(_)) => continue, // Skip other items like certs
            Ok(None) => break,
            Err(e) => {
                return Err(Error::Configuration(format!(
                    "failed to parse private key in {}: {}",
                    path.display(),
                    e
                )));
            }
        }
    }

    Err(Error::Configuration(format!(
        "no private key found in {}",
        path.display()
    )))
}
