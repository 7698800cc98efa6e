//! Credential provider: trust material, operator identity and TLS config.
//!
//! Every candidate list is walked in order and the first file that parses
//! wins. A deployment without a client certificate runs server-side TLS only,
//! which is logged but not an error. A client certificate that fails to parse,
//! or has no usable key, is an error. There is no plaintext fallback.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use serde::Serialize;
use tracing::{debug, info, warn};
use x509_parser::pem::parse_x509_pem;

use crate::domain::config::{CredentialsConfig, GatewayConfig, PeerConfig};
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::identity::{ForwardedIdentity, Identity};

/// ALPN protocol negotiated with the peer's gRPC endpoint.
const ALPN_H2: &[u8] = b"h2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Client presents a certificate
    Mutual,
    /// Client verifies the server only
    ServerOnly,
}

/// TLS configuration handed to the dialer.
#[derive(Clone)]
pub struct TransportCredentials {
    client_config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
    mode: TlsMode,
}

impl TransportCredentials {
    /// Server-side TLS against the given roots.
    pub fn server_only(roots: RootCertStore, server_name: &str) -> GatewayResult<Self> {
        Self::build(roots, None, server_name)
    }

    fn build(
        roots: RootCertStore,
        client: Option<ClientPair>,
        server_name: &str,
    ) -> GatewayResult<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .map_err(|e| GatewayError::CredentialLoadFailed {
                reason: format!("unsupported TLS protocol set: {e}"),
            })?
            .with_root_certificates(roots);

        let (mut config, mode) = match client {
            Some(pair) => {
                let config = builder
                    .with_client_auth_cert(pair.certs, pair.key)
                    .map_err(|e| GatewayError::InvalidCertificate {
                        reason: format!(
                            "client certificate {} rejected: {e}",
                            pair.cert_path.display()
                        ),
                    })?;
                (config, TlsMode::Mutual)
            }
            None => (builder.with_no_client_auth(), TlsMode::ServerOnly),
        };
        config.alpn_protocols = vec![ALPN_H2.to_vec()];

        let server_name = ServerName::try_from(server_name.to_string()).map_err(|e| {
            GatewayError::CredentialLoadFailed {
                reason: format!("invalid TLS server name '{server_name}': {e}"),
            }
        })?;

        Ok(Self {
            client_config: Arc::new(config),
            server_name,
            mode,
        })
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.client_config)
    }

    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    pub fn mode(&self) -> TlsMode {
        self.mode
    }
}

impl std::fmt::Debug for TransportCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCredentials")
            .field("server_name", &self.server_name)
            .field("mode", &self.mode)
            .finish()
    }
}

struct ClientPair {
    cert_path: PathBuf,
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

/// Loads trust material and identities from the configured candidate paths.
#[derive(Debug, Clone)]
pub struct CredentialProvider {
    credentials: CredentialsConfig,
    peer: PeerConfig,
}

impl CredentialProvider {
    pub fn new(credentials: CredentialsConfig, peer: PeerConfig) -> Self {
        Self { credentials, peer }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.credentials.clone(), config.peer.clone())
    }

    // =========================================================================
    // IDENTITIES
    // =========================================================================

    /// Load the long-lived operator identity.
    pub fn load_operator_identity(&self) -> GatewayResult<Identity> {
        let (cert_path, cert_pem) = self.read_operator_cert()?;
        let (key_path, key_pem) = self.read_operator_key()?;

        let identity = self
            .build_identity(&cert_pem, &key_pem, &self.peer.msp_id)
            .map_err(|e| GatewayError::CredentialLoadFailed {
                reason: format!(
                    "operator identity ({}, {}): {e}",
                    cert_path.display(),
                    key_path.display()
                ),
            })?;

        info!(
            msp_id = %identity.msp_id(),
            subject = %identity.subject(),
            cert = %cert_path.display(),
            "Loaded operator identity"
        );
        Ok(identity)
    }

    /// Parse and validate caller-supplied PEM material.
    ///
    /// The private key must belong to the certificate's public key.
    pub fn build_identity(
        &self,
        cert_pem: &[u8],
        key_pem: &[u8],
        msp_id: &str,
    ) -> GatewayResult<Identity> {
        if msp_id.trim().is_empty() {
            return Err(invalid_certificate("MSP ID is empty"));
        }

        let cert = ParsedCertificate::from_pem(cert_pem)?;
        let key = parse_private_key(key_pem)?;
        cert.ensure_matches(&key)?;

        let certificate_pem = String::from_utf8(cert_pem.to_vec())
            .map_err(|_| invalid_certificate("certificate PEM is not UTF-8"))?;

        Ok(Identity::new(
            msp_id.to_string(),
            certificate_pem,
            key_pem.to_vec(),
            cert.subject,
        ))
    }

    /// Validate a forwarded identity against the MSP allowlist and parse it.
    pub fn verify_forwarded(&self, forwarded: &ForwardedIdentity) -> GatewayResult<Identity> {
        let msp_id = forwarded.msp_id.as_str();
        if !self.peer.allowed_msps.is_empty() && !self.peer.allowed_msps.iter().any(|m| m == msp_id)
        {
            return Err(GatewayError::InvalidIdentity {
                msp_id: msp_id.to_string(),
                reason: "MSP is not accepted by this gateway".into(),
            });
        }

        self.build_identity(
            forwarded.certificate_pem.as_bytes(),
            forwarded.private_key_pem.as_bytes(),
            msp_id,
        )
        .map_err(|e| GatewayError::InvalidIdentity {
            msp_id: msp_id.to_string(),
            reason: match e {
                GatewayError::InvalidCertificate { reason } => reason,
                other => other.to_string(),
            },
        })
    }

    fn read_operator_cert(&self) -> GatewayResult<(PathBuf, Vec<u8>)> {
        let mut candidates: Vec<PathBuf> = self.credentials.operator_cert_path.iter().cloned().collect();
        if let Some(msp_dir) = &self.credentials.msp_dir {
            candidates.extend(first_file_in(&msp_dir.join("signcerts"), None));
        }

        for path in &candidates {
            match fs::read(path) {
                Ok(bytes) => match ParsedCertificate::from_pem(&bytes) {
                    Ok(_) => return Ok((path.clone(), bytes)),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unparsable operator certificate"),
                },
                Err(e) => debug!(path = %path.display(), error = %e, "Operator certificate candidate unavailable"),
            }
        }
        Err(GatewayError::CredentialLoadFailed {
            reason: format!(
                "no operator certificate found (tried {} candidates)",
                candidates.len()
            ),
        })
    }

    fn read_operator_key(&self) -> GatewayResult<(PathBuf, Vec<u8>)> {
        let mut candidates = Vec::new();
        if let Some(path) = &self.credentials.operator_key_path {
            if path.is_dir() {
                candidates.extend(first_file_in(path, Some("_sk")));
            } else {
                candidates.push(path.clone());
            }
        }
        if let Some(msp_dir) = &self.credentials.msp_dir {
            candidates.extend(first_file_in(&msp_dir.join("keystore"), Some("_sk")));
        }

        for path in &candidates {
            match fs::read(path) {
                Ok(bytes) => match parse_private_key(&bytes) {
                    Ok(_) => return Ok((path.clone(), bytes)),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unparsable operator key"),
                },
                Err(e) => debug!(path = %path.display(), error = %e, "Operator key candidate unavailable"),
            }
        }
        Err(GatewayError::CredentialLoadFailed {
            reason: format!("no operator private key found (tried {} candidates)", candidates.len()),
        })
    }

    // =========================================================================
    // TRANSPORT
    // =========================================================================

    /// Build the CA pool from the first candidate that yields a certificate.
    pub fn load_ca_pool(&self) -> GatewayResult<RootCertStore> {
        for path in &self.credentials.ca_paths {
            match read_certs(path) {
                Ok(certs) if !certs.is_empty() => {
                    let mut roots = RootCertStore::empty();
                    let (added, ignored) = roots.add_parsable_certificates(certs);
                    if added > 0 {
                        info!(path = %path.display(), added, ignored, "Loaded TLS CA certificate");
                        return Ok(roots);
                    }
                    warn!(path = %path.display(), "CA file holds no usable certificate");
                }
                Ok(_) => warn!(path = %path.display(), "CA file holds no certificate"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "CA candidate not present")
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to read CA candidate"),
            }
        }

        Err(GatewayError::CredentialLoadFailed {
            reason: format!(
                "no usable CA certificate among {} candidate paths",
                self.credentials.ca_paths.len()
            ),
        })
    }

    /// TLS configuration over `ca_pool`, with client authentication when a
    /// client certificate candidate is present.
    pub fn transport_credentials(
        &self,
        ca_pool: RootCertStore,
        server_name_override: Option<&str>,
    ) -> GatewayResult<TransportCredentials> {
        let server_name = server_name_override
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.peer.server_name());

        let client = self.load_client_pair()?;
        match &client {
            Some(pair) => info!(
                server_name,
                cert = %pair.cert_path.display(),
                "Mutual TLS enabled"
            ),
            None => info!(
                server_name,
                "No client certificate found, using server-side TLS only"
            ),
        }

        TransportCredentials::build(ca_pool, client, server_name)
    }

    /// CA pool plus transport credentials using the configured host override.
    pub fn load_transport_credentials(&self) -> GatewayResult<TransportCredentials> {
        let roots = self.load_ca_pool()?;
        self.transport_credentials(roots, self.peer.host_override.as_deref())
    }

    fn load_client_pair(&self) -> GatewayResult<Option<ClientPair>> {
        let mut rejected = Vec::new();
        let mut found = None;

        for path in &self.credentials.client_cert_paths {
            if !path.exists() {
                continue;
            }
            match read_certs(path) {
                Ok(certs) if !certs.is_empty() => {
                    found = Some((path.clone(), certs));
                    break;
                }
                Ok(_) => rejected.push(format!("{}: no certificate", path.display())),
                Err(e) => rejected.push(format!("{}: {e}", path.display())),
            }
        }

        let Some((cert_path, certs)) = found else {
            if rejected.is_empty() {
                return Ok(None);
            }
            return Err(invalid_certificate(format!(
                "client certificate candidates failed to parse: {}",
                rejected.join("; ")
            )));
        };

        for path in &self.credentials.client_key_paths {
            if !path.exists() {
                continue;
            }
            match read_key(path) {
                Ok(Some(key)) => {
                    return Ok(Some(ClientPair {
                        cert_path,
                        certs,
                        key,
                    }))
                }
                Ok(None) => warn!(path = %path.display(), "Client key file holds no private key"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to read client key"),
            }
        }

        Err(GatewayError::CredentialLoadFailed {
            reason: format!(
                "client certificate {} has no usable private key",
                cert_path.display()
            ),
        })
    }
}

fn invalid_certificate(reason: impl Into<String>) -> GatewayError {
    GatewayError::InvalidCertificate {
        reason: reason.into(),
    }
}

/// Fields of a validated X.509 certificate.
struct ParsedCertificate {
    subject: String,
    /// DER-encoded SubjectPublicKeyInfo
    public_key: Vec<u8>,
}

impl ParsedCertificate {
    fn from_pem(cert_pem: &[u8]) -> GatewayResult<Self> {
        let (_, pem) = parse_x509_pem(cert_pem)
            .map_err(|e| invalid_certificate(format!("certificate is not PEM: {e}")))?;
        if pem.label != "CERTIFICATE" {
            return Err(invalid_certificate(format!(
                "expected CERTIFICATE block, found {}",
                pem.label
            )));
        }
        let cert = pem
            .parse_x509()
            .map_err(|e| invalid_certificate(format!("malformed X.509 certificate: {e}")))?;
        if !cert.validity().is_valid() {
            return Err(invalid_certificate("certificate is outside its validity period"));
        }
        let subject = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            subject,
            public_key: cert.public_key().raw.to_vec(),
        })
    }

    fn ensure_matches(&self, key: &PrivateKeyDer<'_>) -> GatewayResult<()> {
        let signer = rustls::crypto::ring::sign::any_supported_type(key)
            .map_err(|e| invalid_certificate(format!("unsupported private key: {e}")))?;
        match signer.public_key() {
            Some(spki) if spki.as_ref() == self.public_key.as_slice() => Ok(()),
            Some(_) => Err(invalid_certificate(
                "private key does not match the certificate's public key",
            )),
            None => {
                debug!(subject = %self.subject, "Key type exposes no public key, pairing unchecked");
                Ok(())
            }
        }
    }
}

fn parse_private_key(key_pem: &[u8]) -> GatewayResult<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| invalid_certificate(format!("malformed private key: {e}")))?
        .ok_or_else(|| invalid_certificate("no private key in PEM"))
}

fn read_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect()
}

fn read_key(path: &Path) -> io::Result<Option<PrivateKeyDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)
}

/// First regular file in `dir` by name, preferring names ending in `suffix`.
fn first_file_in(dir: &Path, suffix: Option<&str>) -> Option<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let preferred = suffix.and_then(|suffix| {
        files.iter().find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(suffix))
        })
    });
    preferred.or_else(|| files.first()).cloned()
}
