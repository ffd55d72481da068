//! TLS-ALPN-01 challenge certificate selection
//!
//! Serves domain-validation proof during automated certificate acquisition
//! using the ACME TLS-ALPN-01 method (RFC 8737): control of a domain is
//! proven by presenting a specially-constructed self-signed certificate
//! during a TLS handshake that advertises the `acme-tls/1` ALPN protocol.
//! The crate sits inside the handshake hot path, so the decision is
//! synchronous, non-blocking, and isolated per connection.
//!
//! # Architecture
//!
//! - [`ChallengeRegistry`] - single-flight table of armed challenges with
//!   TTL expiry and a per-challenge certificate cache
//! - [`AlpnChallengeResolver`] - handshake-time certificate selection,
//!   installable as a rustls certificate resolver
//! - [`ExpirySweeper`] - background eviction of expired challenges
//!
//! # Challenge Flow
//!
//! 1. The ACME orchestrator receives challenge parameters from the CA and
//!    calls [`ChallengeRegistry::arm`] with the domain, the key
//!    authorization, and a TTL
//! 2. The CA's validator connects with ALPN `acme-tls/1` and the domain as
//!    its SNI server name
//! 3. [`AlpnChallengeResolver`] intercepts the handshake and serves the
//!    self-signed challenge certificate carrying the key authorization
//!    digest
//! 4. Every other handshake falls through to the normal certificate path
//! 5. Once the CA confirms validation (or the attempt is abandoned) the
//!    orchestrator calls [`ChallengeRegistry::disarm`]; expired entries
//!    are swept automatically
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use palisade_alpn::{challenge_server_config, ChallengeRegistry, ExpirySweeper};
//!
//! let registry = Arc::new(ChallengeRegistry::new());
//! let config = challenge_server_config(Arc::clone(&registry), default_resolver);
//! tokio::spawn(ExpirySweeper::new(Arc::clone(&registry)).run());
//!
//! // From the ACME orchestrator:
//! registry.arm("example.com", key_authorization, Duration::from_secs(300))?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod domain;
pub mod errors;
pub mod registry;
pub mod resolver;
pub mod sweep;

mod cert;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Challenge state
pub use registry::{ArmedChallenge, ChallengeRegistry, KeyAuthorization};

// Handshake-time negotiation
pub use resolver::{
    challenge_server_config, AlpnChallengeResolver, NegotiationOutcome, RejectReason,
    ACME_TLS_ALPN_NAME,
};

// Error handling
pub use errors::ChallengeError;

// Background expiry sweeping
pub use sweep::ExpirySweeper;
