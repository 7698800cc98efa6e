//! Signing identities.

use std::fmt;

use zeroize::Zeroizing;

/// A parsed Fabric identity: MSP ID, X.509 certificate and private key.
///
/// Built only by [`CredentialProvider`](crate::credentials::CredentialProvider),
/// which validates the material first. The key is wiped on drop.
#[derive(Clone)]
pub struct Identity {
    msp_id: String,
    certificate_pem: String,
    private_key_pem: Zeroizing<Vec<u8>>,
    subject: String,
}

impl Identity {
    pub(crate) fn new(
        msp_id: String,
        certificate_pem: String,
        private_key_pem: Vec<u8>,
        subject: String,
    ) -> Self {
        Self {
            msp_id,
            certificate_pem,
            private_key_pem: Zeroizing::new(private_key_pem),
            subject,
        }
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    pub fn private_key_pem(&self) -> &[u8] {
        &self.private_key_pem
    }

    /// Certificate subject common name, empty if absent
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Creator bytes the transaction ID is derived from.
    pub fn creator(&self) -> Vec<u8> {
        let mut creator = Vec::with_capacity(self.msp_id.len() + self.certificate_pem.len());
        creator.extend_from_slice(self.msp_id.as_bytes());
        creator.extend_from_slice(self.certificate_pem.as_bytes());
        creator
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("msp_id", &self.msp_id)
            .field("subject", &self.subject)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Caller-supplied identity material, extracted from upstream headers.
///
/// Lives for one invocation and is never persisted.
#[derive(Clone)]
pub struct ForwardedIdentity {
    pub msp_id: String,
    pub certificate_pem: String,
    pub private_key_pem: Zeroizing<String>,
}

impl ForwardedIdentity {
    pub fn new(
        msp_id: impl Into<String>,
        certificate_pem: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Self {
        Self {
            msp_id: msp_id.into(),
            certificate_pem: certificate_pem.into(),
            private_key_pem: Zeroizing::new(private_key_pem.into()),
        }
    }
}

impl fmt::Debug for ForwardedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardedIdentity")
            .field("msp_id", &self.msp_id)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}
