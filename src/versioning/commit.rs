//! commit records and creation requests
//!
//! a commit is an immutable node of the version graph. Only `date_updated`
//! and `version_number` move after creation (label and description edits).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{millis_to_datetime, CommitSha};
use crate::versioning::error::{VersioningError, VersioningResult};

/// a commit as stored, with parents in their original order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: CommitSha,
    pub root_sha: String,
    pub author: String,
    pub message: String,
    pub date_created: i64,
    pub date_updated: i64,
    pub version_number: i64,
    pub parent_shas: Vec<CommitSha>,
}

impl Commit {
    /// check if this is a merge commit (has multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parent_shas.len() > 1
    }

    /// get the first (mainline) parent
    pub fn first_parent(&self) -> Option<&CommitSha> {
        self.parent_shas.first()
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        millis_to_datetime(self.date_created)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        millis_to_datetime(self.date_updated)
    }
}

/// request to create a commit, built with a fluent interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCommitRequest {
    #[serde(default)]
    pub parent_shas: Vec<String>,
    pub message: String,
    pub author: String,
    /// creation time in epoch millis; the current time when absent
    #[serde(default)]
    pub date_created: Option<i64>,
}

impl CreateCommitRequest {
    pub fn new(message: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            parent_shas: Vec::new(),
            message: message.into(),
            author: author.into(),
            date_created: None,
        }
    }

    /// append a parent (order is preserved; the first is the mainline)
    pub fn parent(mut self, sha: impl Into<String>) -> Self {
        self.parent_shas.push(sha.into());
        self
    }

    pub fn parents<I, S>(mut self, shas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parent_shas.extend(shas.into_iter().map(Into::into));
        self
    }

    pub fn at(mut self, millis: i64) -> Self {
        self.date_created = Some(millis);
        self
    }

    /// parse the parent list, rejecting malformed and duplicate shas
    pub(crate) fn parsed_parents(&self) -> VersioningResult<Vec<CommitSha>> {
        let mut parsed: Vec<CommitSha> = Vec::with_capacity(self.parent_shas.len());
        for raw in &self.parent_shas {
            let sha = CommitSha::new(raw.as_str())
                .map_err(|e| VersioningError::invalid(format!("parent sha '{}': {}", raw, e)))?;
            if parsed.contains(&sha) {
                return Err(VersioningError::invalid(format!("duplicate parent {}", sha)));
            }
            parsed.push(sha);
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder_and_parents() {
        let a = "a".repeat(64);
        let b = "B".repeat(64);
        let req = CreateCommitRequest::new("merge", "alice").parent(&a).parent(&b).at(42);

        let parents = req.parsed_parents().unwrap();
        assert_eq!(parents[0].as_str(), a);
        assert_eq!(parents[1].as_str(), "b".repeat(64));
        assert_eq!(req.date_created, Some(42));
    }

    #[test]
    fn test_request_rejects_bad_parents() {
        let dup = CreateCommitRequest::new("m", "a").parents(["c".repeat(64), "C".repeat(64)]);
        assert!(dup.parsed_parents().is_err());

        let bad = CreateCommitRequest::new("m", "a").parent("xyz");
        assert!(matches!(
            bad.parsed_parents(),
            Err(VersioningError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_commit_summary() {
        let commit = Commit {
            sha: CommitSha::new("d".repeat(64)).unwrap(),
            root_sha: "root".into(),
            author: "alice".into(),
            message: "first line\nmore".into(),
            date_created: 1_000,
            date_updated: 1_000,
            version_number: 1,
            parent_shas: vec![],
        };
        assert_eq!(commit.summary(), "first line");
        assert!(!commit.is_merge());
        assert!(commit.first_parent().is_none());
        assert_eq!(commit.created_at().unwrap().timestamp_millis(), 1_000);
    }
}
