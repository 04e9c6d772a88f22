//! Fixtures shared by the pem-env integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;

use pem_core::{ArtifactName, PemConfig, PemError, Result, Version};
use pem_env::{Pem, SyncNotifier};
use pem_store::{ArchiveFetcher, ExpectedDigest, FetchedArchive, GitClient};

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

/// Serves prebuilt tarballs keyed by `name-version`.
#[derive(Default)]
pub struct FakeFetcher {
    scratch: Option<tempfile::TempDir>,
    releases: HashMap<String, PathBuf>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            scratch: Some(tempfile::tempdir().unwrap()),
            ..Default::default()
        }
    }

    /// Publish `name@version` with a manifest and metadata naming the version.
    pub fn release(self, name: &str, version: &str) -> Self {
        let friendly = name.split_once('-').map(|(_, m)| m).unwrap_or(name);
        let metadata = format!("{{\"name\":\"{name}\",\"version\":\"{version}\"}}");
        let manifest = format!("class {friendly} {{}}\n");
        self.publish(
            name,
            version,
            &[("metadata.json", &metadata), ("manifests/init.pp", &manifest)],
        )
    }

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
        let slug = format!("{name}-{version}");
        self.releases
            .get(&slug)
            .map(|p| FetchedArchive::borrowed(p.clone(), ExpectedDigest::Trusted))
            .ok_or_else(|| PemError::Fetch(format!("HTTP 404 for {slug}")))
    }
}

/// Counts publishes; fails them while `failing` is set.
#[derive(Default)]
pub struct RecordingNotifier {
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }
}

impl SyncNotifier for RecordingNotifier {
    fn publish(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PemError::Notify("file-sync commit: HTTP 503".into()));
        }
        Ok(())
    }
}

/// A fully wired instance over `base`.
pub fn pem(base: &Path, fetcher: FakeFetcher, notifier: Arc<RecordingNotifier>) -> Pem {
    Pem::with_collaborators(
        &PemConfig::with_basedir(base),
        Arc::new(fetcher),
        Arc::new(GitClient::new(Duration::from_secs(30))),
        notifier,
    )
    .unwrap()
}

/// Every file under `root` with its bytes, keyed by relative path.
pub fn tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                out.insert(
                    path.strip_prefix(root).unwrap().to_path_buf(),
                    fs::read(&path).unwrap(),
                );
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

/// `name → version` pairs as a deploy request.
pub fn request(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Hidden entries left in the environment root.
pub fn leftovers(env_root: &Path) -> Vec<String> {
    fs::read_dir(env_root)
        .unwrap()
        .filter_map(|e| e.unwrap().file_name().into_string().ok())
        .filter(|n| n.starts_with('.'))
        .collect()
}
