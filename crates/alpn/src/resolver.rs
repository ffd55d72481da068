//! Handshake-time challenge negotiation
//!
//! The decision point of the crate: for every inbound TLS handshake,
//! examine the client's offered ALPN protocols and server name and either
//! serve an armed challenge certificate, defer to the normal certificate
//! path, or abort the handshake. RFC 8737 section 3 requires a validator
//! to advertise the `acme-tls/1` protocol and an SNI extension naming the
//! domain being validated.
//!
//! The decision itself is synchronous, never awaits, and touches only the
//! in-memory registry plus local cryptographic computation, so it is safe
//! inside the handshake hot path under arbitrary concurrency.

use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::registry::ChallengeRegistry;

/// ALPN protocol identifier validators advertise for TLS-ALPN-01
pub const ACME_TLS_ALPN_NAME: &[u8] = b"acme-tls/1";

/// Outcome of a single handshake's certificate negotiation
///
/// Produced per handshake and never persisted.
#[derive(Debug)]
pub enum NegotiationOutcome {
    /// Present this challenge certificate and nothing else
    ServeChallengeCert(Arc<CertifiedKey>),
    /// Not a challenge handshake; the normal certificate path must run
    DeferToDefault,
    /// Challenge handshake that cannot be answered; fail the handshake
    Reject(RejectReason),
}

/// Why a challenge handshake was refused
///
/// The TLS alert sent to the peer is necessarily generic; the reason is
/// logged so every refusal stays diagnosable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// Client advertised `acme-tls/1` but no challenge is armed for the name
    #[error("no challenge armed for {domain:?}")]
    NoChallengeArmed {
        /// Normalized server name the validator asked for
        domain: String,
    },

    /// Client advertised `acme-tls/1` without a server name
    #[error("challenge handshake carried no server name")]
    MissingServerName,

    /// Certificate construction failed for this handshake
    #[error("challenge certificate generation failed: {0}")]
    CertGeneration(String),
}

/// Certificate resolver that intercepts TLS-ALPN-01 challenge handshakes
///
/// Installed as the rustls certificate resolver on a listener. Challenge
/// handshakes are answered from the [`ChallengeRegistry`]; everything else
/// resolves through the wrapped fallback resolver, untouched.
#[derive(Debug)]
pub struct AlpnChallengeResolver {
    /// Armed challenge state consulted per handshake
    registry: Arc<ChallengeRegistry>,
    /// Resolver for non-challenge handshakes
    fallback: Option<Arc<dyn ResolvesServerCert>>,
}

impl AlpnChallengeResolver {
    /// Wrap `fallback` so challenge handshakes are intercepted and every
    /// other handshake resolves through it
    pub fn new(registry: Arc<ChallengeRegistry>, fallback: Arc<dyn ResolvesServerCert>) -> Self {
        Self {
            registry,
            fallback: Some(fallback),
        }
    }

    /// Resolver for a listener dedicated to challenge traffic
    ///
    /// Non-challenge handshakes are refused instead of deferred.
    pub fn standalone(registry: Arc<ChallengeRegistry>) -> Self {
        Self {
            registry,
            fallback: None,
        }
    }

    /// Decide how to answer a handshake
    ///
    /// Pure function of the offered protocols, the server name, and the
    /// current registry state. Matching on the server name is
    /// case-insensitive and exact; wildcards never match. The
    /// `DeferToDefault` branch is side-effect free, and a served challenge
    /// stays armed until disarmed or expired, since validators probe from
    /// several vantage points before accepting.
    pub fn decide<'a>(
        &self,
        offered_protocols: impl IntoIterator<Item = &'a [u8]>,
        server_name: Option<&str>,
    ) -> NegotiationOutcome {
        let offers_challenge = offered_protocols
            .into_iter()
            .any(|proto| proto == ACME_TLS_ALPN_NAME);
        if !offers_challenge {
            return NegotiationOutcome::DeferToDefault;
        }

        let Some(name) = server_name else {
            return NegotiationOutcome::Reject(RejectReason::MissingServerName);
        };

        let Some(challenge) = self.registry.lookup(name) else {
            return NegotiationOutcome::Reject(RejectReason::NoChallengeArmed {
                domain: name.to_ascii_lowercase(),
            });
        };

        match challenge.certified_key() {
            Ok(key) => {
                debug!(
                    domain = %challenge.domain(),
                    "Serving TLS-ALPN-01 challenge certificate"
                );
                NegotiationOutcome::ServeChallengeCert(key)
            }
            Err(e) => NegotiationOutcome::Reject(RejectReason::CertGeneration(e.to_string())),
        }
    }
}

impl ResolvesServerCert for AlpnChallengeResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let offered: Vec<Vec<u8>> = client_hello
            .alpn()
            .into_iter()
            .flatten()
            .map(<[u8]>::to_vec)
            .collect();
        let server_name = client_hello.server_name().map(str::to_owned);

        match self.decide(offered.iter().map(Vec::as_slice), server_name.as_deref()) {
            NegotiationOutcome::ServeChallengeCert(key) => Some(key),
            NegotiationOutcome::DeferToDefault => {
                trace!("Not a challenge handshake, using default certificate path");
                self.fallback
                    .as_ref()
                    .and_then(|fallback| fallback.resolve(client_hello))
            }
            NegotiationOutcome::Reject(reason) => {
                warn!(reason = %reason, "Refusing TLS-ALPN-01 challenge handshake");
                None
            }
        }
    }
}

/// Build a rustls server config that answers challenge handshakes
///
/// Non-challenge handshakes resolve through `fallback`, and `acme-tls/1`
/// is appended to the advertised protocols so validators can negotiate it.
/// Callers append their own application protocols (`h2`, `http/1.1`)
/// afterwards.
pub fn challenge_server_config(
    registry: Arc<ChallengeRegistry>,
    fallback: Arc<dyn ResolvesServerCert>,
) -> ServerConfig {
    let resolver = AlpnChallengeResolver::new(registry, fallback);
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
    config.alpn_protocols.push(ACME_TLS_ALPN_NAME.to_vec());
    config
}
