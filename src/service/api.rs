//! VersioningService - high-level interface over the commit graph.

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::span::EnteredSpan;
use ulid::Ulid;

use crate::lock::{LockManager, WriteLockGuard};
use crate::query::{CommitQuery, KeyValueKind, QueryEngine};
use crate::service::config::ServiceConfig;
use crate::storage::{
    now_millis, CommitSha, MetadataIdentity, NewRepository, RefName, Repositories, RepositoryHandle, RepositoryId,
    SessionPool,
};
use crate::versioning::{
    commit_lock_key, AccessProvider, AllowAll, BlobAttributeSetter, BlobBuilder, Commit, CommitGraph,
    CreateCommitRequest, DeletionCoordinator, DeletionOutcome, KeyValue, ListCommitsRequest, MetadataService, NamedRef,
    Page, RefDirectory, RefKind, RepositoryResolver, SqlMetadata, VersioningError, VersioningResult,
};

/// Property under which a commit's editable description is stored.
pub const DESCRIPTION_PROPERTY: &str = "description";

/// How much of each matching commit `find_commits` loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    #[default]
    Full,
    IdsOnly,
    RootHashOnly,
}

/// Request for `find_commits`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindCommitsRequest {
    pub query: CommitQuery,
    /// Restrict the access scope to one workspace.
    pub workspace: Option<String>,
    pub projection: Projection,
}

/// One match of `find_commits`, filled according to the projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundCommit {
    pub repository_id: RepositoryId,
    pub sha: CommitSha,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<Commit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindCommitsResponse {
    pub commits: Vec<FoundCommit>,
    pub total_records: u64,
}

fn op_span(operation: &'static str) -> EnteredSpan {
    tracing::info_span!("versioning", operation, op_id = %Ulid::new()).entered()
}

fn parse_sha(raw: &str) -> VersioningResult<CommitSha> {
    CommitSha::new(raw).map_err(|e| VersioningError::invalid(format!("commit sha '{}': {}", raw, e)))
}

fn parse_ref(raw: &str) -> VersioningResult<RefName> {
    RefName::new(raw).map_err(|e| VersioningError::invalid(format!("ref name '{}': {}", raw, e)))
}

/// The versioning engine, wired to a store.
///
/// Every operation checks out a session, runs in one transaction and is
/// replayed from scratch on retryable failures.
pub struct VersioningService {
    config: ServiceConfig,
    pool: SessionPool,
    locks: LockManager,
    metadata: Arc<dyn MetadataService>,
    access: Arc<dyn AccessProvider>,
}

impl VersioningService {
    /// Open the store described by `config`.
    pub fn open(config: ServiceConfig) -> VersioningResult<Self> {
        config.default_branch_name()?;
        let pool = SessionPool::open(config.pool_options())?;
        let locks = LockManager::with_soft_capacity(config.lock_soft_capacity);
        tracing::info!(path = %config.path.display(), "opened versioning service");
        Ok(Self {
            config,
            pool,
            locks,
            metadata: Arc::new(SqlMetadata),
            access: Arc::new(AllowAll),
        })
    }

    pub fn with_access(mut self, access: Arc<dyn AccessProvider>) -> Self {
        self.access = access;
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataService>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Stop handing out sessions.
    pub fn close(&self) {
        self.pool.close();
    }

    fn write<T>(&self, operation: &str, mut f: impl FnMut(&Connection) -> VersioningResult<T>) -> VersioningResult<T> {
        self.config.retry.run(operation, || -> VersioningResult<T> {
            let mut session = self.pool.get()?;
            let tx = session.write()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    fn read<T>(&self, operation: &str, mut f: impl FnMut(&Connection) -> VersioningResult<T>) -> VersioningResult<T> {
        self.config.retry.run(operation, || -> VersioningResult<T> {
            let mut session = self.pool.get()?;
            let tx = session.read()?;
            f(&tx)
        })
    }

    /// Pin the creation time and lock the candidate commit identity.
    fn lock_candidate(&self, request: &CreateCommitRequest) -> VersioningResult<(CreateCommitRequest, WriteLockGuard)> {
        let date_created = request.date_created.unwrap_or_else(now_millis);
        let parents = request.parsed_parents()?;
        let key = commit_lock_key(&parents, &request.message, &request.author, date_created);
        let guard = self.locks.acquire_write_lock(&key);
        Ok((request.clone().at(date_created), guard))
    }

    // ---------------------------------------------------------------------
    // commits
    // ---------------------------------------------------------------------

    /// Create a commit. `attributes`, when given, runs after the commit row
    /// exists and inside the same transaction.
    pub fn create_commit(
        &self,
        repository: &dyn RepositoryResolver,
        request: &CreateCommitRequest,
        blob_builder: &dyn BlobBuilder,
        attributes: Option<&dyn BlobAttributeSetter>,
    ) -> VersioningResult<Commit> {
        let _span = op_span("create_commit");
        self.config.retry.run("create_commit", || -> VersioningResult<Commit> {
            let (request, guard) = self.lock_candidate(request)?;
            let mut session = self.pool.get()?;
            let tx = session.write()?;
            let handle = repository.resolve(&tx)?;
            let commit = CommitGraph::create_commit(&tx, &guard, &handle, &request, blob_builder)?;
            if let Some(setter) = attributes {
                setter.apply(&tx, handle.id, &commit.sha)?;
            }
            tx.commit()?;
            Ok(commit)
        })
    }

    pub fn get_commit(&self, repository: &dyn RepositoryResolver, sha: &str) -> VersioningResult<Commit> {
        let _span = op_span("get_commit");
        let sha = parse_sha(sha)?;
        self.read("get_commit", |conn| {
            let handle = repository.resolve(conn)?;
            CommitGraph::get_commit(conn, &sha, &handle)
        })
    }

    pub fn list_commits(
        &self,
        repository: &dyn RepositoryResolver,
        request: &ListCommitsRequest,
    ) -> VersioningResult<Page<Commit>> {
        let _span = op_span("list_commits");
        self.read("list_commits", |conn| {
            let handle = repository.resolve(conn)?;
            CommitGraph::list_commits(conn, &handle, request)
        })
    }

    /// `sha` and its ancestors inside the repository, newest first.
    pub fn commit_log(&self, repository: &dyn RepositoryResolver, sha: &str) -> VersioningResult<Vec<Commit>> {
        let _span = op_span("commit_log");
        let sha = parse_sha(sha)?;
        self.read("commit_log", |conn| {
            let handle = repository.resolve(conn)?;
            CommitGraph::commit_log(conn, &handle, &sha)
        })
    }

    /// Filter, sort and page commits across every accessible repository.
    pub fn find_commits(&self, request: &FindCommitsRequest) -> VersioningResult<FindCommitsResponse> {
        let _span = op_span("find_commits");
        self.read("find_commits", |conn| {
            let scope = self.access.accessible_repository_ids(conn, request.workspace.as_deref())?;
            let page = QueryEngine::find(conn, &scope, &request.query)?;

            let mut commits = Vec::with_capacity(page.matches.len());
            for matched in page.matches {
                let mut found = FoundCommit {
                    repository_id: matched.repository_id,
                    sha: matched.sha,
                    root_sha: None,
                    commit: None,
                };
                match request.projection {
                    Projection::Full => found.commit = CommitGraph::load(conn, &found.sha)?,
                    Projection::RootHashOnly => found.root_sha = CommitGraph::root_sha_of(conn, &found.sha)?,
                    Projection::IdsOnly => {}
                }
                commits.push(found);
            }
            Ok(FindCommitsResponse {
                commits,
                total_records: page.total_records,
            })
        })
    }

    /// Delete leaf commits of a repository in one transaction.
    pub fn delete_commits(&self, repository: &dyn RepositoryResolver, shas: &[String]) -> VersioningResult<bool> {
        let _span = op_span("delete_commits");
        let shas = shas.iter().map(|s| parse_sha(s)).collect::<VersioningResult<Vec<_>>>()?;
        self.write("delete_commits", |conn| {
            let handle = repository.resolve(conn)?;
            DeletionCoordinator::delete_commits(conn, self.metadata.as_ref(), &handle, &shas)?;
            Ok(true)
        })
    }

    /// Splice dataset versions out of their chains, one transaction per id,
    /// in the given order.
    ///
    /// A retryable failure replays the whole batch; ids removed by an earlier
    /// attempt come back as `DeletionOutcome::Missing`.
    pub fn delete_dataset_versions(
        &self,
        repository: Option<&dyn RepositoryResolver>,
        ids: &[String],
    ) -> VersioningResult<Vec<DeletionOutcome>> {
        let _span = op_span("delete_dataset_versions");
        let shas = ids.iter().map(|s| parse_sha(s)).collect::<VersioningResult<Vec<_>>>()?;
        self.config.retry.run("delete_dataset_versions", || -> VersioningResult<Vec<DeletionOutcome>> {
            let mut session = self.pool.get()?;
            let mut outcomes = Vec::with_capacity(shas.len());
            for sha in &shas {
                let tx = session.write()?;
                let expected = match repository {
                    Some(resolver) => Some(resolver.resolve(&tx)?),
                    None => None,
                };
                let outcome =
                    DeletionCoordinator::delete_dataset_version(&tx, self.metadata.as_ref(), expected.as_ref(), sha)?;
                tx.commit()?;
                outcomes.push(outcome);
            }
            Ok(outcomes)
        })
    }

    // ---------------------------------------------------------------------
    // branches and tags
    // ---------------------------------------------------------------------

    fn set_ref(
        &self,
        operation: &'static str,
        kind: RefKind,
        repository: &dyn RepositoryResolver,
        name: &str,
        sha: &str,
    ) -> VersioningResult<NamedRef> {
        let _span = op_span(operation);
        let name = parse_ref(name)?;
        let sha = parse_sha(sha)?;
        self.write(operation, |conn| {
            let handle = repository.resolve(conn)?;
            match kind {
                RefKind::Branch => RefDirectory::set_branch(conn, &handle, &name, &sha),
                RefKind::Tag => RefDirectory::set_tag(conn, &handle, &name, &sha),
            }
        })
    }

    fn get_ref(
        &self,
        operation: &'static str,
        kind: RefKind,
        repository: &dyn RepositoryResolver,
        name: &str,
    ) -> VersioningResult<Commit> {
        let _span = op_span(operation);
        let name = parse_ref(name)?;
        self.read(operation, |conn| {
            let handle = repository.resolve(conn)?;
            RefDirectory::get(conn, kind, &handle, &name)
        })
    }

    fn list_refs(
        &self,
        operation: &'static str,
        kind: RefKind,
        repository: &dyn RepositoryResolver,
    ) -> VersioningResult<Vec<NamedRef>> {
        let _span = op_span(operation);
        self.read(operation, |conn| {
            let handle = repository.resolve(conn)?;
            RefDirectory::list(conn, kind, handle.id)
        })
    }

    fn delete_ref(
        &self,
        operation: &'static str,
        kind: RefKind,
        repository: &dyn RepositoryResolver,
        name: &str,
    ) -> VersioningResult<()> {
        let _span = op_span(operation);
        let name = parse_ref(name)?;
        self.write(operation, |conn| {
            let handle = repository.resolve(conn)?;
            RefDirectory::delete(conn, kind, handle.id, &name)
        })
    }

    /// Point a branch at a commit of the repository, creating it if needed.
    pub fn set_branch(&self, repository: &dyn RepositoryResolver, name: &str, sha: &str) -> VersioningResult<NamedRef> {
        self.set_ref("set_branch", RefKind::Branch, repository, name, sha)
    }

    pub fn get_branch(&self, repository: &dyn RepositoryResolver, name: &str) -> VersioningResult<Commit> {
        self.get_ref("get_branch", RefKind::Branch, repository, name)
    }

    pub fn list_branches(&self, repository: &dyn RepositoryResolver) -> VersioningResult<Vec<NamedRef>> {
        self.list_refs("list_branches", RefKind::Branch, repository)
    }

    pub fn delete_branch(&self, repository: &dyn RepositoryResolver, name: &str) -> VersioningResult<()> {
        self.delete_ref("delete_branch", RefKind::Branch, repository, name)
    }

    /// Tag a commit. Fails `AlreadyExists` if the tag is set.
    pub fn set_tag(&self, repository: &dyn RepositoryResolver, name: &str, sha: &str) -> VersioningResult<NamedRef> {
        self.set_ref("set_tag", RefKind::Tag, repository, name, sha)
    }

    pub fn get_tag(&self, repository: &dyn RepositoryResolver, name: &str) -> VersioningResult<Commit> {
        self.get_ref("get_tag", RefKind::Tag, repository, name)
    }

    pub fn list_tags(&self, repository: &dyn RepositoryResolver) -> VersioningResult<Vec<NamedRef>> {
        self.list_refs("list_tags", RefKind::Tag, repository)
    }

    pub fn delete_tag(&self, repository: &dyn RepositoryResolver, name: &str) -> VersioningResult<()> {
        self.delete_ref("delete_tag", RefKind::Tag, repository, name)
    }

    // ---------------------------------------------------------------------
    // commit metadata
    // ---------------------------------------------------------------------

    /// Apply a metadata edit and bump the commit's update time and version.
    fn edit_commit(
        &self,
        operation: &'static str,
        repository: &dyn RepositoryResolver,
        sha: &str,
        edit: impl Fn(&Connection, &MetadataIdentity) -> VersioningResult<()>,
    ) -> VersioningResult<Commit> {
        let _span = op_span(operation);
        let sha = parse_sha(sha)?;
        self.write(operation, |conn| {
            let handle = repository.resolve(conn)?;
            CommitGraph::require_member(conn, &handle, &sha)?;
            let identity = MetadataIdentity::at_default_location(handle.id, sha.clone());
            edit(conn, &identity)?;
            let version = CommitGraph::touch_commit(conn, &sha, now_millis())?;
            tracing::debug!(sha = %sha.short(), version, "commit metadata updated");
            CommitGraph::get_commit(conn, &sha, &handle)
        })
    }

    fn read_commit_metadata<T>(
        &self,
        operation: &'static str,
        repository: &dyn RepositoryResolver,
        sha: &str,
        read: impl Fn(&Connection, &MetadataIdentity) -> VersioningResult<T>,
    ) -> VersioningResult<T> {
        let _span = op_span(operation);
        let sha = parse_sha(sha)?;
        self.read(operation, |conn| {
            let handle = repository.resolve(conn)?;
            CommitGraph::require_member(conn, &handle, &sha)?;
            read(conn, &MetadataIdentity::at_default_location(handle.id, sha.clone()))
        })
    }

    pub fn add_commit_labels(
        &self,
        repository: &dyn RepositoryResolver,
        sha: &str,
        labels: &[String],
    ) -> VersioningResult<Commit> {
        self.edit_commit("add_commit_labels", repository, sha, |conn, id| {
            self.metadata.add_labels(conn, id, labels)
        })
    }

    pub fn get_commit_labels(&self, repository: &dyn RepositoryResolver, sha: &str) -> VersioningResult<Vec<String>> {
        self.read_commit_metadata("get_commit_labels", repository, sha, |conn, id| {
            self.metadata.get_labels(conn, id)
        })
    }

    /// Remove `labels`, or all labels when `delete_all` is set.
    pub fn delete_commit_labels(
        &self,
        repository: &dyn RepositoryResolver,
        sha: &str,
        labels: &[String],
        delete_all: bool,
    ) -> VersioningResult<Commit> {
        self.edit_commit("delete_commit_labels", repository, sha, |conn, id| {
            self.metadata.delete_labels(conn, id, labels, delete_all)
        })
    }

    pub fn update_commit_description(
        &self,
        repository: &dyn RepositoryResolver,
        sha: &str,
        description: &str,
    ) -> VersioningResult<Commit> {
        self.edit_commit("update_commit_description", repository, sha, |conn, id| {
            self.metadata.add_property(conn, id, DESCRIPTION_PROPERTY, description)
        })
    }

    pub fn get_commit_description(
        &self,
        repository: &dyn RepositoryResolver,
        sha: &str,
    ) -> VersioningResult<Option<String>> {
        self.read_commit_metadata("get_commit_description", repository, sha, |conn, id| {
            self.metadata.get_property(conn, id, DESCRIPTION_PROPERTY)
        })
    }

    pub fn add_commit_attributes(
        &self,
        repository: &dyn RepositoryResolver,
        sha: &str,
        entries: &[KeyValue],
    ) -> VersioningResult<()> {
        let _span = op_span("add_commit_attributes");
        let sha = parse_sha(sha)?;
        self.write("add_commit_attributes", |conn| {
            let handle = repository.resolve(conn)?;
            CommitGraph::require_member(conn, &handle, &sha)?;
            let identity = MetadataIdentity::at_default_location(handle.id, sha.clone());
            self.metadata.put_key_values(conn, &identity, entries)
        })
    }

    pub fn get_commit_attributes(
        &self,
        repository: &dyn RepositoryResolver,
        sha: &str,
        kind: Option<KeyValueKind>,
    ) -> VersioningResult<Vec<KeyValue>> {
        self.read_commit_metadata("get_commit_attributes", repository, sha, |conn, id| {
            self.metadata.get_key_values(conn, id, kind)
        })
    }

    // ---------------------------------------------------------------------
    // repositories
    // ---------------------------------------------------------------------

    pub fn create_repository(&self, new: &NewRepository) -> VersioningResult<RepositoryHandle> {
        let _span = op_span("create_repository");
        self.write("create_repository", |conn| {
            let handle = Repositories::create(conn, new, now_millis())?;
            tracing::info!(repository_id = %handle.id, workspace = %handle.workspace, name = %handle.name, "created repository");
            Ok(handle)
        })
    }

    /// Create a repository with a root commit and the default branch on it.
    pub fn create_repository_with_initial_commit(
        &self,
        new: &NewRepository,
        request: &CreateCommitRequest,
        blob_builder: &dyn BlobBuilder,
    ) -> VersioningResult<(RepositoryHandle, Commit)> {
        let _span = op_span("create_repository");
        if !request.parent_shas.is_empty() {
            return Err(VersioningError::invalid("an initial commit can't have parents"));
        }
        let branch = self.config.default_branch_name()?;
        self.config.retry.run("create_repository", || -> VersioningResult<(RepositoryHandle, Commit)> {
            let (request, guard) = self.lock_candidate(request)?;
            let mut session = self.pool.get()?;
            let tx = session.write()?;
            let handle = Repositories::create(&tx, new, now_millis())?;
            let commit = CommitGraph::create_commit(&tx, &guard, &handle, &request, blob_builder)?;
            RefDirectory::set_branch(&tx, &handle, &branch, &commit.sha)?;
            tx.commit()?;
            Ok((handle, commit))
        })
    }

    pub fn get_repository(&self, repository: &dyn RepositoryResolver) -> VersioningResult<RepositoryHandle> {
        let _span = op_span("get_repository");
        self.read("get_repository", |conn| repository.resolve(conn))
    }

    /// Soft-delete a repository. Its commits stay but drop out of queries.
    pub fn delete_repository(&self, repository: &dyn RepositoryResolver) -> VersioningResult<()> {
        let _span = op_span("delete_repository");
        self.write("delete_repository", |conn| {
            let handle = repository.resolve(conn)?;
            Repositories::soft_delete(conn, handle.id, now_millis())?;
            tracing::info!(repository_id = %handle.id, "deleted repository");
            Ok(())
        })
    }
}
