//! Error types for the challenge core.

use thiserror::Error;

/// Errors surfaced by challenge arming and certificate construction
#[derive(Debug, Error)]
pub enum ChallengeError {
    /// Domain is empty or not a syntactically valid DNS name
    #[error("invalid challenge domain {0:?}")]
    InvalidDomain(String),

    /// Key authorization was empty
    #[error("key authorization must not be empty")]
    EmptyKeyAuthorization,

    /// A live challenge already exists for this domain
    #[error("challenge already armed for {0:?}")]
    AlreadyArmed(String),

    /// Challenge certificate construction failed
    #[error("challenge certificate generation failed: {0}")]
    CertGeneration(String),
}
