//! Armed challenge state
//!
//! Tracks which domains currently have an outstanding TLS-ALPN-01
//! challenge and hands the handshake path everything it needs to answer
//! one: the key authorization digest and a cached challenge certificate.
//!
//! # Thread Safety
//!
//! The registry is the only shared mutable state in the crate. It uses
//! `DashMap` so that handshake-time lookups are concurrent shard reads,
//! while arm/disarm/sweep take a shard write lock only for the map
//! mutation itself. A domain maps to at most one [`ArmedChallenge`] at any
//! instant; arming is atomic and either fully applies or fails with no
//! visible change.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use rustls::sign::CertifiedKey;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::cert;
use crate::domain::{lookup_key, normalize_domain};
use crate::errors::ChallengeError;

/// Account-key-bound secret supplied by the ACME orchestrator
///
/// Only its SHA-256 digest ever leaves this type; the raw token is
/// sensitive and `Debug` prints a redacted placeholder so it cannot reach
/// logs.
#[derive(Clone)]
pub struct KeyAuthorization(String);

impl KeyAuthorization {
    /// Wrap a key authorization token
    ///
    /// # Errors
    ///
    /// Returns [`ChallengeError::EmptyKeyAuthorization`] for an empty token.
    pub fn new(token: impl Into<String>) -> Result<Self, ChallengeError> {
        let token = token.into();
        if token.is_empty() {
            return Err(ChallengeError::EmptyKeyAuthorization);
        }
        Ok(Self(token))
    }

    /// SHA-256 digest embedded in the challenge certificate
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_bytes()).into()
    }
}

impl fmt::Debug for KeyAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyAuthorization(<redacted>)")
    }
}

/// A live, time-bounded domain-validation challenge
///
/// Exclusively owned by the [`ChallengeRegistry`]; handshakes receive `Arc`
/// snapshots. The only mutation after creation is the one-time certificate
/// cache fill.
#[derive(Debug)]
pub struct ArmedChallenge {
    /// Normalized domain being validated
    domain: String,
    /// Challenge secret from the orchestrator
    key_auth: KeyAuthorization,
    /// Instant after which the challenge is no longer served
    expires_at: Instant,
    /// Challenge certificate, built on first use
    cert: OnceCell<Arc<CertifiedKey>>,
}

impl ArmedChallenge {
    fn new(domain: String, key_auth: KeyAuthorization, ttl: Duration) -> Self {
        Self {
            domain,
            key_auth,
            expires_at: Instant::now() + ttl,
            cert: OnceCell::new(),
        }
    }

    /// Domain this challenge validates, in normalized form
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Instant after which the challenge stops being served
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the challenge has passed its expiry at `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    /// Challenge certificate for this domain
    ///
    /// Validators commonly connect more than once, so the first successful
    /// build is cached for the life of the armed challenge and retries skip
    /// the asymmetric key generation. A build failure is returned to the
    /// current handshake only; the next handshake retries.
    pub fn certified_key(&self) -> Result<Arc<CertifiedKey>, ChallengeError> {
        self.cert
            .get_or_try_init(|| cert::challenge_certificate(&self.domain, &self.key_auth).map(Arc::new))
            .cloned()
    }
}

/// Single-flight table of armed TLS-ALPN-01 challenges
///
/// The ACME orchestrator arms a challenge before the CA validates and
/// disarms it afterwards; every inbound TLS handshake consults the table
/// through [`ChallengeRegistry::lookup`]. Re-arming a domain whose
/// challenge is still live is rejected with
/// [`ChallengeError::AlreadyArmed`]; the outstanding challenge must be
/// disarmed or expire first, so a CA mid-validation never sees its digest
/// change underneath it.
#[derive(Debug, Default)]
pub struct ChallengeRegistry {
    /// Map of normalized domain -> armed challenge
    entries: DashMap<String, Arc<ArmedChallenge>>,
}

impl ChallengeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Arm a challenge for `domain` with the given key authorization
    ///
    /// The challenge is served to validators until `ttl` elapses or
    /// [`disarm`](Self::disarm) is called. An expired leftover entry is
    /// replaced atomically.
    ///
    /// # Errors
    ///
    /// * [`ChallengeError::InvalidDomain`] for a malformed domain
    /// * [`ChallengeError::EmptyKeyAuthorization`] for an empty token
    /// * [`ChallengeError::AlreadyArmed`] while a live challenge exists
    pub fn arm(
        &self,
        domain: &str,
        key_auth: impl Into<String>,
        ttl: Duration,
    ) -> Result<Arc<ArmedChallenge>, ChallengeError> {
        let domain = normalize_domain(domain)?;
        let key_auth = KeyAuthorization::new(key_auth)?;
        let challenge = Arc::new(ArmedChallenge::new(domain.clone(), key_auth, ttl));

        let now = Instant::now();
        match self.entries.entry(domain.clone()) {
            Entry::Occupied(mut slot) => {
                if !slot.get().is_expired(now) {
                    return Err(ChallengeError::AlreadyArmed(domain));
                }
                slot.insert(Arc::clone(&challenge));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&challenge));
            }
        }

        debug!(
            domain = %challenge.domain(),
            ttl_secs = ttl.as_secs(),
            "Armed TLS-ALPN-01 challenge"
        );
        Ok(challenge)
    }

    /// Look up the live challenge for a server name
    ///
    /// Hot path, called for every challenge handshake. Safe for unlimited
    /// concurrent callers. An expired entry found here is evicted lazily;
    /// reads never otherwise mutate the table.
    pub fn lookup(&self, server_name: &str) -> Option<Arc<ArmedChallenge>> {
        let key = lookup_key(server_name);
        let now = Instant::now();

        // Clone out of the shard guard before any removal so the shard
        // lock is never re-entered.
        let found = self.entries.get(&key).map(|entry| Arc::clone(entry.value()));

        match found {
            Some(challenge) if !challenge.is_expired(now) => {
                trace!(domain = %key, "Armed challenge found");
                Some(challenge)
            }
            Some(_) => {
                self.entries.remove_if(&key, |_, entry| entry.is_expired(now));
                trace!(domain = %key, "Armed challenge expired");
                None
            }
            None => {
                trace!(domain = %key, "No armed challenge");
                None
            }
        }
    }

    /// Disarm the challenge for `domain`, if any
    ///
    /// Idempotent; called when the CA confirms validation or the attempt is
    /// abandoned.
    pub fn disarm(&self, domain: &str) {
        let key = lookup_key(domain);
        if self.entries.remove(&key).is_some() {
            debug!(domain = %key, "Disarmed TLS-ALPN-01 challenge");
        }
    }

    /// Remove every challenge whose expiry has passed at `now`
    ///
    /// Returns the number of entries removed. Shard locks are held only for
    /// the map mutation itself.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Swept expired TLS-ALPN-01 challenges");
        }
        removed
    }

    /// Number of armed challenges, including expired entries not yet swept
    pub fn armed_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_arm_and_lookup() {
        let registry = ChallengeRegistry::new();

        registry.arm("example.com", "token-1", TTL).unwrap();

        let challenge = registry.lookup("example.com").expect("armed challenge");
        assert_eq!(challenge.domain(), "example.com");
        assert_eq!(registry.armed_count(), 1);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ChallengeRegistry::new();

        registry.arm("example.com", "token-1", TTL).unwrap();

        assert!(registry.lookup("Example.COM").is_some());
        assert!(registry.lookup("example.com.").is_some());
    }

    #[test]
    fn test_arm_normalizes_domain() {
        let registry = ChallengeRegistry::new();

        let challenge = registry.arm("Example.COM.", "token-1", TTL).unwrap();

        assert_eq!(challenge.domain(), "example.com");
        assert!(registry.lookup("example.com").is_some());
    }

    #[test]
    fn test_arm_rejects_invalid_input() {
        let registry = ChallengeRegistry::new();

        assert!(matches!(
            registry.arm("", "token", TTL),
            Err(ChallengeError::InvalidDomain(_))
        ));
        assert!(matches!(
            registry.arm("not a domain", "token", TTL),
            Err(ChallengeError::InvalidDomain(_))
        ));
        assert!(matches!(
            registry.arm("example.com", "", TTL),
            Err(ChallengeError::EmptyKeyAuthorization)
        ));
        assert_eq!(registry.armed_count(), 0);
    }

    #[test]
    fn test_rearm_rejected_while_live() {
        let registry = ChallengeRegistry::new();

        registry.arm("example.com", "token-1", TTL).unwrap();

        assert!(matches!(
            registry.arm("example.com", "token-2", TTL),
            Err(ChallengeError::AlreadyArmed(_))
        ));

        // The original challenge is untouched
        let challenge = registry.lookup("example.com").unwrap();
        let expected: [u8; 32] = Sha256::digest(b"token-1").into();
        assert_eq!(challenge.key_auth.digest(), expected);
    }

    #[test]
    fn test_rearm_allowed_after_disarm() {
        let registry = ChallengeRegistry::new();

        registry.arm("example.com", "token-1", TTL).unwrap();
        registry.disarm("example.com");

        registry.arm("example.com", "token-2", TTL).unwrap();
        assert_eq!(registry.armed_count(), 1);
    }

    #[test]
    fn test_rearm_replaces_expired_entry() {
        let registry = ChallengeRegistry::new();

        registry
            .arm("example.com", "token-1", Duration::from_millis(5))
            .unwrap();
        thread::sleep(Duration::from_millis(20));

        let challenge = registry.arm("example.com", "token-2", TTL).unwrap();
        let expected: [u8; 32] = Sha256::digest(b"token-2").into();
        assert_eq!(challenge.key_auth.digest(), expected);
    }

    #[test]
    fn test_lookup_evicts_expired_entry() {
        let registry = ChallengeRegistry::new();

        registry
            .arm("example.com", "token-1", Duration::from_millis(5))
            .unwrap();
        thread::sleep(Duration::from_millis(20));

        assert!(registry.lookup("example.com").is_none());
        assert_eq!(registry.armed_count(), 0);
    }

    #[test]
    fn test_disarm_is_idempotent() {
        let registry = ChallengeRegistry::new();

        registry.disarm("never-armed.example");

        registry.arm("example.com", "token-1", TTL).unwrap();
        registry.disarm("example.com");
        registry.disarm("example.com");

        assert!(registry.lookup("example.com").is_none());
    }

    #[test]
    fn test_sweep_removes_exactly_expired() {
        let registry = ChallengeRegistry::new();

        registry
            .arm("expired.example", "token-1", Duration::from_millis(5))
            .unwrap();
        registry.arm("live.example", "token-2", TTL).unwrap();
        thread::sleep(Duration::from_millis(20));

        let removed = registry.sweep(Instant::now());

        assert_eq!(removed, 1);
        assert_eq!(registry.armed_count(), 1);
        assert!(registry.lookup("live.example").is_some());
        assert!(registry.lookup("expired.example").is_none());
    }

    #[test]
    fn test_sweep_boundary_is_inclusive() {
        let registry = ChallengeRegistry::new();

        let challenge = registry.arm("example.com", "token-1", TTL).unwrap();

        assert_eq!(registry.sweep(challenge.expires_at()), 1);
        assert_eq!(registry.armed_count(), 0);
    }

    #[test]
    fn test_certified_key_is_cached() {
        let registry = ChallengeRegistry::new();

        let challenge = registry.arm("example.com", "token-1", TTL).unwrap();

        let first = challenge.certified_key().unwrap();
        let second = challenge.certified_key().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_concurrent_arm_single_winner() {
        let registry = Arc::new(ChallengeRegistry::new());
        let mut handles = vec![];

        for i in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                registry.arm("example.com", format!("token-{i}"), TTL).is_ok()
            }));
        }

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(registry.armed_count(), 1);
    }

    #[test]
    fn test_key_authorization_debug_is_redacted() {
        let key_auth = KeyAuthorization::new("super-secret-token").unwrap();
        let rendered = format!("{key_auth:?}");
        assert!(!rendered.contains("super-secret-token"));
    }
}
