//! Module store behavior against real directories, tarballs, and git repos.

mod common;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use git2::Repository;

use pem_core::{ArtifactName, PemError, SourceType, Version, SIDECAR_FILE};
use pem_store::ModuleSource;

use common::{annotated_tag, commit, store, tarball, FakeFetcher};

fn name(s: &str) -> ArtifactName {
    ArtifactName::new(s).unwrap()
}

#[test]
fn registry_deploy_then_list_reports_version() {
    let base = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::new().publish(
        "puppetlabs-ntp",
        "6.4.1",
        &[("metadata.json", "{\"version\":\"6.4.1\"}"), ("manifests/init.pp", "class ntp {}")],
    ));
    let store = store(base.path(), fetcher.clone());

    let record = store
        .deploy("puppetlabs-ntp", "6.4.1", &ModuleSource::Registry)
        .unwrap();
    assert_eq!(record.source_type, SourceType::Registry);
    assert_eq!(record.source_locator, "https://forge.puppet.com/puppetlabs/ntp");
    assert!(record.location.join("manifests/init.pp").is_file());
    assert!(record.location.join(SIDECAR_FILE).is_file());

    let versions = store.list_versions(&name("puppetlabs-ntp")).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions["6.4.1"], record);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn invalid_name_creates_nothing() {
    let base = tempfile::tempdir().unwrap();
    let store = store(base.path(), Arc::new(FakeFetcher::new()));
    for bad in ["ntp", "a-b-c", "../x-y", "acme-"] {
        let err = store.deploy(bad, "1.0.0", &ModuleSource::Registry).unwrap_err();
        assert!(matches!(err, PemError::InvalidName { .. }), "{bad}: {err}");
    }
    assert!(!base.path().join("modules").exists());
}

#[test]
fn failed_fetch_leaves_no_version() {
    let base = tempfile::tempdir().unwrap();
    let store = store(base.path(), Arc::new(FakeFetcher::new()));
    let err = store
        .deploy("acme-ntp", "9.9.9", &ModuleSource::Registry)
        .unwrap_err();
    assert!(matches!(err, PemError::Fetch(_)));
    assert!(store.list_versions(&name("acme-ntp")).unwrap().is_empty());
    assert!(!store
        .version_dir(&name("acme-ntp"), &Version::new("9.9.9").unwrap())
        .exists());
}

#[test]
fn redeploy_replaces_rather_than_merges() {
    let base = tempfile::tempdir().unwrap();
    let store = store(base.path(), Arc::new(FakeFetcher::new()));
    let scratch = tempfile::tempdir().unwrap();

    let first = tarball(&scratch.path().join("a.tar.gz"), "m", &[("old.pp", "old")]);
    let src = ModuleSource::Upload { archive: first, locator: None };
    let rec = store.deploy("acme-ntp", "1.0.0", &src).unwrap();
    assert!(rec.location.join("old.pp").is_file());
    assert_eq!(rec.source_locator, "Upload");

    let second = tarball(&scratch.path().join("b.tar.gz"), "m", &[("new.pp", "new")]);
    let src = ModuleSource::Upload { archive: second, locator: Some("ticket-42".into()) };
    let rec = store.deploy("acme-ntp", "1.0.0", &src).unwrap();
    assert!(!rec.location.join("old.pp").exists());
    assert!(rec.location.join("new.pp").is_file());
    assert_eq!(rec.source_locator, "ticket-42");
}

#[test]
fn purge_is_idempotent_and_removes_from_listing() {
    let base = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::new().publish("acme-ntp", "1.0.0", &[("a.pp", "")]));
    let store = store(base.path(), fetcher);
    store.deploy("acme-ntp", "1.0.0", &ModuleSource::Registry).unwrap();

    assert!(store.purge("acme-ntp", "1.0.0").unwrap());
    assert!(!store.purge("acme-ntp", "1.0.0").unwrap());
    assert!(store.list_versions(&name("acme-ntp")).unwrap().is_empty());
    assert!(store.list_all().unwrap().is_empty());
}

#[test]
fn module_directory_goes_with_its_last_version() {
    let base = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .publish("acme-ntp", "1.0.0", &[("a.pp", "")])
            .publish("acme-ntp", "1.1.0", &[("a.pp", "")]),
    );
    let store = store(base.path(), fetcher);
    store.deploy("acme-ntp", "1.0.0", &ModuleSource::Registry).unwrap();
    store.deploy("acme-ntp", "1.1.0", &ModuleSource::Registry).unwrap();
    let module_dir = base.path().join("modules/acme-ntp");

    assert!(store.purge("acme-ntp", "1.0.0").unwrap());
    assert!(module_dir.join("1.1.0").is_dir());

    assert!(store.purge("acme-ntp", "1.1.0").unwrap());
    assert!(!module_dir.exists());
}

#[test]
fn purge_guarded_keeps_version_when_precondition_fails() {
    let base = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::new().publish("acme-ntp", "1.0.0", &[("a.pp", "")]));
    let store = store(base.path(), fetcher);
    store.deploy("acme-ntp", "1.0.0", &ModuleSource::Registry).unwrap();

    let err = store
        .purge_guarded("acme-ntp", "1.0.0", |n, v| {
            Err(PemError::InUse {
                name: n.to_string(),
                version: v.to_string(),
                environments: vec!["prod".into()],
            })
        })
        .unwrap_err();
    assert!(matches!(err, PemError::InUse { .. }));
    assert_eq!(store.list_versions(&name("acme-ntp")).unwrap().len(), 1);
}

#[test]
fn scan_skips_incomplete_and_corrupt_versions() {
    let base = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::new().publish("acme-ntp", "1.0.0", &[("a.pp", "")]));
    let store = store(base.path(), fetcher);
    store.deploy("acme-ntp", "1.0.0", &ModuleSource::Registry).unwrap();

    let module_dir = store.root().join("acme-ntp");
    fs::create_dir_all(module_dir.join("2.0.0-partial")).unwrap();
    fs::create_dir_all(module_dir.join("3.0.0")).unwrap();
    fs::write(module_dir.join("3.0.0").join(SIDECAR_FILE), ": : not yaml [").unwrap();
    fs::create_dir_all(store.root().join("not_a_module")).unwrap();

    let all = store.list_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all["acme-ntp"].keys().collect::<Vec<_>>(), vec!["1.0.0"]);
}

#[test]
fn deploy_many_continues_past_failures() {
    let base = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .publish("acme-ntp", "1.0.0", &[("a.pp", "")])
            .publish("acme-ntp", "1.0.2", &[("a.pp", "")]),
    );
    let store = store(base.path(), fetcher);
    let versions = vec!["1.0.0".to_string(), "1.0.1".to_string(), "1.0.2".to_string()];
    let report = store.deploy_many("acme-ntp", &versions, &ModuleSource::Registry);

    assert!(!report.is_success());
    assert_eq!(report.deployed().count(), 2);
    let failed: Vec<_> = report.failures().map(|(v, _)| v).collect();
    assert_eq!(failed, vec!["1.0.1"]);
}

#[test]
fn vcs_deploy_checks_out_annotated_tag_content() {
    let upstream = tempfile::tempdir().unwrap();
    let repo = Repository::init(upstream.path()).unwrap();
    let v1 = commit(&repo, "manifests/init.pp", "class ntp { # v1 }");
    annotated_tag(&repo, "v1.0.0", v1);
    commit(&repo, "manifests/init.pp", "class ntp { # v2 }");

    let base = tempfile::tempdir().unwrap();
    let store = store(base.path(), Arc::new(FakeFetcher::new()));
    let remote = upstream.path().to_str().unwrap().to_string();
    let rec = store
        .deploy("ipcrm-ntp", "v1.0.0", &ModuleSource::Vcs { remote: remote.clone() })
        .unwrap();

    assert_eq!(rec.source_type, SourceType::Vcs);
    assert_eq!(rec.source_locator, remote);
    assert_eq!(
        fs::read_to_string(rec.location.join("manifests/init.pp")).unwrap(),
        "class ntp { # v1 }"
    );
}

#[test]
fn vcs_deploy_of_commit_id() {
    let upstream = tempfile::tempdir().unwrap();
    let repo = Repository::init(upstream.path()).unwrap();
    let first = commit(&repo, "init.pp", "one");
    commit(&repo, "init.pp", "two");

    let base = tempfile::tempdir().unwrap();
    let store = store(base.path(), Arc::new(FakeFetcher::new()));
    let short = first.to_string()[..7].to_string();
    let rec = store
        .deploy(
            "myorg-ntp",
            &short,
            &ModuleSource::Vcs { remote: upstream.path().to_str().unwrap().into() },
        )
        .unwrap();
    assert_eq!(fs::read_to_string(rec.location.join("init.pp")).unwrap(), "one");
}

#[test]
fn vcs_deploy_of_unknown_ref_fails_cleanly() {
    let upstream = tempfile::tempdir().unwrap();
    let repo = Repository::init(upstream.path()).unwrap();
    commit(&repo, "init.pp", "one");

    let base = tempfile::tempdir().unwrap();
    let store = store(base.path(), Arc::new(FakeFetcher::new()));
    let err = store
        .deploy(
            "myorg-ntp",
            "v9.9.9",
            &ModuleSource::Vcs { remote: upstream.path().to_str().unwrap().into() },
        )
        .unwrap_err();
    assert!(matches!(err, PemError::Checkout(_)));
    assert!(store.list_all().unwrap().is_empty());
}

#[test]
fn resolve_by_friendly_name() {
    let base = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .publish("acme-ntp", "1.0.0", &[("a.pp", "")])
            .publish("other-ntp", "2.0.0", &[("a.pp", "")])
            .publish("other-ntp", "1.0.0", &[("a.pp", "")]),
    );
    let store = store(base.path(), fetcher);
    store.deploy("acme-ntp", "1.0.0", &ModuleSource::Registry).unwrap();
    store.deploy("other-ntp", "2.0.0", &ModuleSource::Registry).unwrap();

    let v2 = Version::new("2.0.0").unwrap();
    let (resolved, _) = store.resolve("ntp", &v2).unwrap();
    assert_eq!(resolved.as_str(), "other-ntp");

    let (resolved, _) = store.resolve("acme-ntp", &Version::new("1.0.0").unwrap()).unwrap();
    assert_eq!(resolved.as_str(), "acme-ntp");

    assert!(matches!(
        store.resolve("dns", &v2),
        Err(PemError::UnknownArtifact { .. })
    ));

    store.deploy("other-ntp", "1.0.0", &ModuleSource::Registry).unwrap();
    let err = store.resolve("ntp", &Version::new("1.0.0").unwrap()).unwrap_err();
    assert!(err.to_string().contains("ambiguous"));
}
