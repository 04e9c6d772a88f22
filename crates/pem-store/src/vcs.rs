//! # Version-Control Client
//!
//! [`VcsClient`] is the contract the stores need from version control:
//! clone, check out a ref, peel an annotated tag to its commit, read the
//! checked-out commit, and look up a remote branch head without cloning.
//! [`GitClient`] implements it on libgit2.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Direction, FetchOptions, ObjectType, RemoteCallbacks, Repository};

use pem_core::{PemError, Result};

/// A cloned working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsHandle {
    /// Root of the working tree.
    pub workdir: PathBuf,
}

/// Operations the stores need from version control.
pub trait VcsClient: Send + Sync {
    /// Clone `remote` into `dest` (which must not exist or be empty).
    fn clone_at(&self, remote: &str, dest: &Path) -> Result<VcsHandle>;

    /// Check out `reference` with a detached HEAD.
    ///
    /// Fails with [`PemError::Checkout`] when the ref does not name a commit
    /// directly, e.g. an annotated tag; callers resolve those with
    /// [`resolve_tag`](Self::resolve_tag) and check out the result.
    fn checkout(&self, handle: &VcsHandle, reference: &str) -> Result<()>;

    /// Peel `reference` to the id of the commit it ultimately points at.
    fn resolve_tag(&self, handle: &VcsHandle, reference: &str) -> Result<String>;

    /// Full id of the checked-out commit.
    fn head_commit(&self, handle: &VcsHandle) -> Result<String>;

    /// Commit id `branch` points at on `remote`, or `None` if the branch does
    /// not exist there.
    fn remote_branch_head(&self, remote: &str, branch: &str) -> Result<Option<String>>;
}

/// Check out `reference`, falling back to peeling it as a tag.
pub fn checkout_peeling(vcs: &dyn VcsClient, handle: &VcsHandle, reference: &str) -> Result<String> {
    match vcs.checkout(handle, reference) {
        Ok(()) => vcs.head_commit(handle),
        Err(PemError::Checkout(reason)) => {
            tracing::debug!(reference, %reason, "direct checkout failed; resolving as tag");
            let commit = vcs.resolve_tag(handle, reference)?;
            vcs.checkout(handle, &commit)?;
            Ok(commit)
        }
        Err(e) => Err(e),
    }
}

/// [`VcsClient`] backed by libgit2.
#[derive(Debug, Clone)]
pub struct GitClient {
    clone_timeout: Duration,
}

fn checkout_err(what: &str, e: git2::Error) -> PemError {
    PemError::Checkout(format!("{what}: {}", e.message()))
}

impl GitClient {
    /// A client whose clones abort after `clone_timeout`.
    pub fn new(clone_timeout: Duration) -> Self {
        Self { clone_timeout }
    }

    fn open(handle: &VcsHandle) -> Result<Repository> {
        Repository::open(&handle.workdir)
            .map_err(|e| checkout_err(&format!("opening {}", handle.workdir.display()), e))
    }
}

impl VcsClient for GitClient {
    fn clone_at(&self, remote: &str, dest: &Path) -> Result<VcsHandle> {
        tracing::info!(remote, dest = %dest.display(), "cloning repository");
        let started = Instant::now();
        let deadline = self.clone_timeout;
        let expired = Cell::new(false);

        let mut callbacks = RemoteCallbacks::new();
        callbacks.transfer_progress(|_| {
            if started.elapsed() > deadline {
                expired.set(true);
                false
            } else {
                true
            }
        });
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(callbacks);

        let result = RepoBuilder::new().fetch_options(fetch).clone(remote, dest);
        match result {
            Ok(_) => Ok(VcsHandle {
                workdir: dest.to_path_buf(),
            }),
            Err(_) if expired.get() => Err(PemError::Timeout {
                operation: format!("clone of {remote}"),
                after: deadline,
            }),
            Err(e) => Err(checkout_err(&format!("cloning {remote}"), e)),
        }
    }

    fn checkout(&self, handle: &VcsHandle, reference: &str) -> Result<()> {
        let repo = Self::open(handle)?;
        let object = repo
            .revparse_single(reference)
            .or_else(|_| repo.revparse_single(&format!("origin/{reference}")))
            .map_err(|e| checkout_err(&format!("unknown ref {reference}"), e))?;
        if object.kind() != Some(ObjectType::Commit) {
            return Err(PemError::Checkout(format!(
                "{reference} names a {}, not a commit",
                object.kind().map(|k| k.str()).unwrap_or("unknown object")
            )));
        }
        let mut opts = CheckoutBuilder::new();
        opts.force();
        repo.checkout_tree(&object, Some(&mut opts))
            .map_err(|e| checkout_err(&format!("checking out {reference}"), e))?;
        repo.set_head_detached(object.id())
            .map_err(|e| checkout_err(&format!("detaching HEAD at {reference}"), e))?;
        tracing::debug!(reference, commit = %object.id(), "checked out");
        Ok(())
    }

    fn resolve_tag(&self, handle: &VcsHandle, reference: &str) -> Result<String> {
        let repo = Self::open(handle)?;
        let object = repo
            .revparse_single(&format!("refs/tags/{reference}"))
            .or_else(|_| repo.revparse_single(reference))
            .map_err(|e| checkout_err(&format!("unknown tag {reference}"), e))?;
        let commit = object
            .peel_to_commit()
            .map_err(|e| checkout_err(&format!("peeling {reference}"), e))?;
        Ok(commit.id().to_string())
    }

    fn head_commit(&self, handle: &VcsHandle) -> Result<String> {
        let repo = Self::open(handle)?;
        let head = repo.head().map_err(|e| checkout_err("reading HEAD", e))?;
        let commit = head
            .peel_to_commit()
            .map_err(|e| checkout_err("peeling HEAD", e))?;
        Ok(commit.id().to_string())
    }

    fn remote_branch_head(&self, remote: &str, branch: &str) -> Result<Option<String>> {
        let mut handle = git2::Remote::create_detached(remote)
            .map_err(|e| checkout_err(&format!("opening remote {remote}"), e))?;
        handle
            .connect(Direction::Fetch)
            .map_err(|e| checkout_err(&format!("connecting to {remote}"), e))?;
        let wanted = format!("refs/heads/{branch}");
        let heads = handle
            .list()
            .map_err(|e| checkout_err(&format!("listing {remote}"), e))?;
        Ok(heads
            .iter()
            .find(|h| h.name() == wanted)
            .map(|h| h.oid().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use std::fs;

    fn commit(repo: &Repository, file: &str, body: &str) -> git2::Oid {
        let wd = repo.workdir().unwrap();
        fs::write(wd.join(file), body).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(file)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("pem", "pem@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, "update", &tree, &parents)
            .unwrap()
    }

    #[test]
    fn annotated_tag_needs_peeling() {
        let upstream = tempfile::tempdir().unwrap();
        let repo = Repository::init(upstream.path()).unwrap();
        let first = commit(&repo, "init.pp", "v1");
        let sig = Signature::now("pem", "pem@example.com").unwrap();
        let target = repo.find_object(first, None).unwrap();
        repo.tag("v1.0.0", &target, &sig, "release", false).unwrap();
        commit(&repo, "init.pp", "v2");

        let work = tempfile::tempdir().unwrap();
        let client = GitClient::new(Duration::from_secs(30));
        let handle = client
            .clone_at(upstream.path().to_str().unwrap(), &work.path().join("c"))
            .unwrap();

        assert!(matches!(client.checkout(&handle, "v1.0.0"), Err(PemError::Checkout(_))));
        let resolved = checkout_peeling(&client, &handle, "v1.0.0").unwrap();
        assert_eq!(resolved, first.to_string());
        assert_eq!(fs::read_to_string(handle.workdir.join("init.pp")).unwrap(), "v1");
    }

    #[test]
    fn remote_branch_head_without_clone() {
        let upstream = tempfile::tempdir().unwrap();
        let repo = Repository::init(upstream.path()).unwrap();
        let id = commit(&repo, "data.yaml", "a: 1");
        let c = repo.find_commit(id).unwrap();
        repo.branch("main", &c, true).unwrap();

        let client = GitClient::new(Duration::from_secs(30));
        let url = upstream.path().to_str().unwrap();
        assert_eq!(client.remote_branch_head(url, "main").unwrap(), Some(id.to_string()));
        assert_eq!(client.remote_branch_head(url, "nope").unwrap(), None);
    }

    #[test]
    fn clone_of_missing_remote_is_checkout_error() {
        let work = tempfile::tempdir().unwrap();
        let client = GitClient::new(Duration::from_secs(5));
        let err = client
            .clone_at("/nonexistent/pem/repo", &work.path().join("c"))
            .unwrap_err();
        assert!(matches!(err, PemError::Checkout(_)));
    }
}
