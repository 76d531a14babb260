//! Step unique identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use super::canonical::CanonicalEncoder;
use crate::spec::{StepRef, StepSpec};

/// Number of digest bytes kept in an identifier.
pub const DIGEST_BYTES: usize = 16;

const DOMAIN: &str = "stepflow-id-v1";

/// A fixed-length deterministic digest identifying a computation.
///
/// Two steps with the same type, version and argument composition share an
/// identifier regardless of their names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepId(String);

impl StepId {
    /// Builds an identifier from raw digest bytes.
    ///
    /// Only the first [`DIGEST_BYTES`] bytes are used.
    #[must_use]
    pub fn from_digest_bytes(bytes: &[u8]) -> Self {
        let len = bytes.len().min(DIGEST_BYTES);
        Self(hex::encode(&bytes[..len]))
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened digest for log output.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when parsing a malformed identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid step identifier '{0}': expected {len} lowercase hex characters", len = DIGEST_BYTES * 2)]
pub struct InvalidStepId(pub String);

impl FromStr for StepId {
    type Err = InvalidStepId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == DIGEST_BYTES * 2
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidStepId(s.to_string()))
        }
    }
}

impl TryFrom<String> for StepId {
    type Error = InvalidStepId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StepId> for String {
    fn from(value: StepId) -> Self {
        value.0
    }
}

/// Computes the identifier of a step given a resolver for its references.
///
/// The digest covers the step type, version and canonical arguments, where
/// every reference contributes the referenced step's identifier.
///
/// # Errors
///
/// Propagates the first error returned by `resolve`.
pub fn compute_identifier<E, F>(spec: &StepSpec, resolve: &mut F) -> Result<StepId, E>
where
    F: FnMut(&StepRef) -> Result<StepId, E>,
{
    let mut encoder = CanonicalEncoder::new();
    encoder.write_str(DOMAIN);
    encoder.write_str(&spec.step_type);
    encoder.write_str(&spec.version);
    encoder.write_arguments(spec.arguments.iter(), resolve)?;

    let mut hasher = Sha256::new();
    hasher.update(encoder.finish());
    let result = hasher.finalize();
    Ok(StepId::from_digest_bytes(&result))
}
