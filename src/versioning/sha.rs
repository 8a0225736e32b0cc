//! Deterministic commit identity.

use sha2::{Digest, Sha256};

use crate::storage::{CommitSha, TreeHash};

/// Feed one length-prefixed field so adjacent fields can't run together.
fn field(hasher: &mut Sha256, tag: &str, value: &[u8]) {
    hasher.update(tag.as_bytes());
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value);
}

fn commit_fields(
    hasher: &mut Sha256,
    parent_shas: &[CommitSha],
    message: &str,
    author: &str,
    date_created: i64,
) {
    hasher.update((parent_shas.len() as u64).to_be_bytes());
    for parent in parent_shas {
        field(hasher, "parent", parent.as_str().as_bytes());
    }
    field(hasher, "message", message.as_bytes());
    field(hasher, "date_created", &date_created.to_be_bytes());
    field(hasher, "author", author.as_bytes());
}

/// SHA-256 over parents (in the given order), message, creation time, author
/// and the content root hash.
pub fn compute_commit_sha(
    root_hash: &TreeHash,
    parent_shas: &[CommitSha],
    message: &str,
    author: &str,
    date_created: i64,
) -> CommitSha {
    let mut hasher = Sha256::new();
    commit_fields(&mut hasher, parent_shas, message, author, date_created);
    field(&mut hasher, "root", root_hash.as_str().as_bytes());
    CommitSha::from_digest(hex::encode(hasher.finalize()))
}

/// Lock key for a commit about to be created, before its root hash is known.
///
/// Two requests that would produce the same commit map to the same key.
pub fn commit_lock_key(parent_shas: &[CommitSha], message: &str, author: &str, date_created: i64) -> String {
    let mut hasher = Sha256::new();
    commit_fields(&mut hasher, parent_shas, message, author, date_created);
    format!("commit:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(c: char) -> CommitSha {
        CommitSha::new(c.to_string().repeat(64)).unwrap()
    }

    fn root(s: &str) -> TreeHash {
        TreeHash::new(s).unwrap()
    }

    #[test]
    fn test_identical_content_same_sha() {
        let parents = vec![parent('a'), parent('b')];
        let one = compute_commit_sha(&root("t1"), &parents, "msg", "alice", 1000);
        let two = compute_commit_sha(&root("t1"), &parents, "msg", "alice", 1000);
        assert_eq!(one, two);
        assert_eq!(one.as_str().len(), 64);
    }

    #[test]
    fn test_digests_are_lowercase_hex() {
        let sha = compute_commit_sha(&root("t1"), &[parent('a')], "msg", "alice", 1000);
        assert!(sha.as_str().chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));

        let key = commit_lock_key(&[parent('a')], "msg", "alice", 1000);
        let digest = key.strip_prefix("commit:").unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(hex::decode(digest).unwrap().len(), 32);
        assert_eq!(digest, digest.to_ascii_lowercase());
    }

    #[test]
    fn test_every_field_changes_sha() {
        let parents = vec![parent('a'), parent('b')];
        let base = compute_commit_sha(&root("t1"), &parents, "msg", "alice", 1000);

        let variants = [
            compute_commit_sha(&root("t2"), &parents, "msg", "alice", 1000),
            compute_commit_sha(&root("t1"), &[parent('b'), parent('a')], "msg", "alice", 1000),
            compute_commit_sha(&root("t1"), &[parent('a')], "msg", "alice", 1000),
            compute_commit_sha(&root("t1"), &parents, "msg2", "alice", 1000),
            compute_commit_sha(&root("t1"), &parents, "msg", "bob", 1000),
            compute_commit_sha(&root("t1"), &parents, "msg", "alice", 1001),
        ];
        for variant in variants {
            assert_ne!(variant, base);
        }
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = compute_commit_sha(&root("t"), &[], "ab", "c", 1);
        let b = compute_commit_sha(&root("t"), &[], "a", "bc", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_lock_key_ignores_root_hash() {
        let parents = vec![parent('c')];
        let k1 = commit_lock_key(&parents, "m", "x", 5);
        let k2 = commit_lock_key(&parents, "m", "x", 5);
        assert_eq!(k1, k2);
        assert!(k1.starts_with("commit:"));
        assert_ne!(k1, commit_lock_key(&parents, "m", "x", 6));
    }
}
