//! Challenge certificate construction
//!
//! Builds the self-signed certificate a TLS-ALPN-01 validator expects per
//! RFC 8737 section 3: the validated domain as its only subject alternative
//! name, plus the critical `id-pe-acmeIdentifier` extension
//! (OID 1.3.6.1.5.5.7.1.31) carrying the SHA-256 digest of the key
//! authorization as a DER octet string. The DER encoding of the extension
//! is delegated to rcgen, which implements the RFC encoding exactly.

use std::sync::Arc;

use rcgen::{CertificateParams, CustomExtension, DistinguishedName, KeyPair};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::PrivatePkcs8KeyDer;
use rustls::sign::CertifiedKey;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::errors::ChallengeError;
use crate::registry::KeyAuthorization;

/// Validity window for generated challenge certificates
///
/// Validators ignore the validity period; it only needs to cover the
/// challenge lifetime plus clock skew.
const VALIDITY: Duration = Duration::hours(24);

/// Build the challenge certificate for `domain`
///
/// Generates a fresh ECDSA P-256 key pair, self-signs a certificate whose
/// sole SAN is `domain` with the acme identifier extension embedded, and
/// packages both as a rustls [`CertifiedKey`] ready to present in a
/// handshake. CPU-bound with bounded latency; any failure maps to
/// [`ChallengeError::CertGeneration`] and affects only the calling
/// handshake.
pub(crate) fn challenge_certificate(
    domain: &str,
    key_auth: &KeyAuthorization,
) -> Result<CertifiedKey, ChallengeError> {
    let digest = key_auth.digest();

    let key_pair = KeyPair::generate().map_err(generation_error)?;

    let mut params = CertificateParams::new(vec![domain.to_owned()]).map_err(generation_error)?;
    params.distinguished_name = DistinguishedName::new();
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + VALIDITY;
    params
        .custom_extensions
        .push(CustomExtension::new_acme_identifier(&digest));

    let certificate = params.self_signed(&key_pair).map_err(generation_error)?;

    // Load through the process provider when one is installed; otherwise
    // fall back to the provider the crate is built with.
    let provider = match CryptoProvider::get_default() {
        Some(provider) => Arc::clone(provider),
        None => Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
    };
    let signing_key = provider
        .key_provider
        .load_private_key(PrivatePkcs8KeyDer::from(key_pair.serialize_der()).into())
        .map_err(generation_error)?;

    debug!(domain = %domain, "Generated TLS-ALPN-01 challenge certificate");
    Ok(CertifiedKey::new(vec![certificate.der().clone()], signing_key))
}

fn generation_error(err: impl std::fmt::Display) -> ChallengeError {
    ChallengeError::CertGeneration(err.to_string())
}
