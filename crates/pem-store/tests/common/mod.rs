//! Fixtures shared by the pem-store integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use git2::{Oid, Repository, Signature};

use pem_core::{ArtifactName, KeyedLocks, PemError, Result, Version};
use pem_store::{ArchiveFetcher, ExpectedDigest, FetchedArchive, GitClient, ModuleStore};

/// Write a `.tar.gz` whose entries all sit under `top/`.
pub fn tarball(out: &Path, top: &str, files: &[(&str, &str)]) -> PathBuf {
    let file = File::create(out).unwrap();
    let mut b = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (path, body) in files {
        let mut h = tar::Header::new_gnu();
        h.set_size(body.len() as u64);
        h.set_mode(0o644);
        h.set_cksum();
        b.append_data(&mut h, format!("{top}/{path}"), body.as_bytes())
            .unwrap();
    }
    b.into_inner().unwrap().finish().unwrap();
    out.to_path_buf()
}

/// Serves prebuilt tarballs keyed by `name-version`; unknown keys fail with
/// `Fetch`.
#[derive(Default)]
pub struct FakeFetcher {
    scratch: Option<tempfile::TempDir>,
    releases: HashMap<String, PathBuf>,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            scratch: Some(tempfile::tempdir().unwrap()),
            ..Default::default()
        }
    }

    /// Publish `name@version` with the given files.
    pub fn publish(mut self, name: &str, version: &str, files: &[(&str, &str)]) -> Self {
        let slug = format!("{name}-{version}");
        let dir = self.scratch.as_ref().unwrap().path().to_path_buf();
        let path = tarball(&dir.join(format!("{slug}.tar.gz")), &slug, files);
        self.releases.insert(slug, path);
        self
    }
}

impl ArchiveFetcher for FakeFetcher {
    fn fetch(&self, name: &ArtifactName, version: &Version) -> Result<FetchedArchive> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let slug = format!("{name}-{version}");
        self.releases
            .get(&slug)
            .map(|p| {
                let sha256 = pem_store::fetch::sha256_file(p).unwrap();
                FetchedArchive::borrowed(p.clone(), ExpectedDigest::Sha256(sha256))
            })
            .ok_or_else(|| PemError::Fetch(format!("HTTP 404 for {slug}")))
    }
}

/// Commit `body` to `file` on the current branch.
pub fn commit(repo: &Repository, file: &str, body: &str) -> Oid {
    let wd = repo.workdir().unwrap();
    let target = wd.join(file);
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::write(&target, body).unwrap();
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

/// Point branch `name` at `oid`.
pub fn branch(repo: &Repository, name: &str, oid: Oid) {
    let c = repo.find_commit(oid).unwrap();
    repo.branch(name, &c, true).unwrap();
}

/// Create an annotated tag.
pub fn annotated_tag(repo: &Repository, name: &str, oid: Oid) {
    let sig = Signature::now("pem", "pem@example.com").unwrap();
    let obj = repo.find_object(oid, None).unwrap();
    repo.tag(name, &obj, &sig, "release", false).unwrap();
}

/// A module store over `root` with the given fetcher and a real git client.
pub fn store(root: &Path, fetcher: Arc<dyn ArchiveFetcher>) -> ModuleStore {
    ModuleStore::new(
        root.join("modules"),
        fetcher,
        Arc::new(GitClient::new(Duration::from_secs(30))),
        Arc::new(KeyedLocks::new()),
    )
}
