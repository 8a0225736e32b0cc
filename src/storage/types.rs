//! core type-safe identifiers for the storage layer.

use std::fmt;
use std::fmt::Formatter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of a hex encoded SHA-256 digest.
pub const SHA_HEX_LEN: usize = 64;

/// Location under which commit-level and dataset-version metadata is stored.
pub const DEFAULT_BLOB_LOCATION: &str = "version";

/// This makes sure we don't accidentally pass a root hash where a commit sha
/// is expected. Always lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitSha(String);

impl CommitSha {
    /// parse a CommitSha from a hex string
    pub fn new(hex: impl Into<String>) -> Result<Self, InvalidNameError> {
        let hex = hex.into().to_ascii_lowercase();
        validate_hex(&hex)?;
        Ok(Self(hex))
    }

    /// wrap a digest produced by this crate (already validated)
    pub(crate) fn from_digest(hex: String) -> Self {
        Self(hex)
    }

    /// short form of the commit sha
    pub fn short(&self) -> &str {
        &self.0[..7]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CommitSha {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CommitSha> for String {
    fn from(value: CommitSha) -> Self {
        value.0
    }
}

impl AsRef<str> for CommitSha {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate_hex(hex: &str) -> Result<(), InvalidNameError> {
    if hex.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if hex.len() != SHA_HEX_LEN {
        return Err(InvalidNameError::BadLength {
            expected: SHA_HEX_LEN,
            actual: hex.len(),
        });
    }
    for (i, c) in hex.chars().enumerate() {
        if !c.is_ascii_hexdigit() {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }
    }
    Ok(())
}

/// Root hash of a commit's content tree, supplied by the blob builder.
///
/// The hash format belongs to the blob layer, so only emptiness is checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeHash(String);

impl TreeHash {
    pub fn new(hash: impl Into<String>) -> Result<Self, InvalidNameError> {
        let hash = hash.into();
        if hash.trim().is_empty() {
            return Err(InvalidNameError::Empty);
        }
        Ok(Self(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TreeHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Primary key of a repository row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryId(pub i64);

impl RepositoryId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated branch or tag name.
///
/// Restricted in the same spirit as git ref names:
/// - 1-256 characters
/// - no whitespace or control characters
/// - no `..`, no leading or trailing `/`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

impl RefName {
    /// the default branch every dataset repository carries
    pub const MASTER: &'static str = "master";

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.len() > 256 {
            return Err(InvalidNameError::TooLong(name.len()));
        }
        if name.contains("..") || name.ends_with('/') || name.starts_with('/') {
            return Err(InvalidNameError::InvalidPath(name));
        }
        for (i, c) in name.chars().enumerate() {
            if c.is_whitespace() || c.is_control() {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }
        Ok(Self(name))
    }

    pub fn master() -> Self {
        Self(Self::MASTER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RefName {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RefName> for String {
    fn from(value: RefName) -> Self {
        value.0
    }
}

/// Composite key under which labels, properties and attributes of a commit are
/// stored: `(repository, commit, blob location)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataIdentity {
    pub repository_id: RepositoryId,
    pub commit_sha: CommitSha,
    pub location: String,
}

impl MetadataIdentity {
    pub fn new(repository_id: RepositoryId, commit_sha: CommitSha, location: impl Into<String>) -> Self {
        Self {
            repository_id,
            commit_sha,
            location: location.into(),
        }
    }

    /// identity at the default blob location
    pub fn at_default_location(repository_id: RepositoryId, commit_sha: CommitSha) -> Self {
        Self::new(repository_id, commit_sha, DEFAULT_BLOB_LOCATION)
    }
}

impl fmt::Display for MetadataIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.repository_id, self.commit_sha, self.location)
    }
}

/// Current wall clock in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds back into a UTC timestamp.
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// error type for invalid names (shas, branches, tags, repositories)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    BadLength { expected: usize, actual: usize },
    InvalidCharacter { char: char, position: usize },
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::BadLength { expected, actual } => {
                write!(f, "expected {} characters, found {}", expected, actual)
            }
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char.escape_default(), position)
            }
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_sha_valid() {
        let sha = CommitSha::new("A".repeat(64)).unwrap();
        assert_eq!(sha.as_str(), "a".repeat(64));
        assert_eq!(sha.short(), "aaaaaaa");
    }

    #[test]
    fn test_commit_sha_invalid() {
        assert_eq!(CommitSha::new(""), Err(InvalidNameError::Empty));
        assert!(matches!(
            CommitSha::new("abc"),
            Err(InvalidNameError::BadLength { expected: 64, actual: 3 })
        ));
        assert!(matches!(
            CommitSha::new(format!("{}g", "a".repeat(63))),
            Err(InvalidNameError::InvalidCharacter { char: 'g', position: 63 })
        ));
    }

    #[test]
    fn test_ref_name_rules() {
        assert!(RefName::new("master").is_ok());
        assert!(RefName::new("release/v1").is_ok());
        assert!(RefName::new("").is_err());
        assert!(RefName::new("a..b").is_err());
        assert!(RefName::new("/lead").is_err());
        assert!(RefName::new("trail/").is_err());
        assert!(RefName::new("has space").is_err());
        assert!(RefName::new("x".repeat(257)).is_err());
    }

    #[test]
    fn test_metadata_identity_display() {
        let sha = CommitSha::new("b".repeat(64)).unwrap();
        let identity = MetadataIdentity::at_default_location(RepositoryId(12), sha);
        assert_eq!(identity.to_string(), format!("12::{}::version", "b".repeat(64)));
    }

    #[test]
    fn test_millis_round_trip() {
        let dt = millis_to_datetime(1_700_000_000_123).unwrap();
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_123);
    }
}
