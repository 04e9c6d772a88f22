//! Environment deploy, redeploy, destroy, and recovery on real directories.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pem_core::{EnvModuleSidecar, FailureState, PemError, PublishStatus, SIDECAR_FILE};
use pem_env::RecoveryReport;
use pem_store::ModuleSource;

use common::{leftovers, pem, request, tree, FakeFetcher, RecordingNotifier};

fn fetcher() -> FakeFetcher {
    FakeFetcher::new()
        .release("acme-ntp", "1.0.0")
        .release("acme-ntp", "1.1.0")
        .release("acme-apache", "2.0.0")
        .release("other-ntp", "1.0.0")
}

fn stock(pem: &pem_env::Pem) {
    for (name, version) in [
        ("acme-ntp", "1.0.0"),
        ("acme-ntp", "1.1.0"),
        ("acme-apache", "2.0.0"),
    ] {
        pem.modules()
            .deploy(name, version, &ModuleSource::Registry)
            .unwrap();
    }
}

#[test]
fn deploy_copies_modules_and_writes_local_sidecars() {
    let base = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let pem = pem(base.path(), fetcher(), notifier.clone());
    stock(&pem);

    let out = pem
        .environments()
        .deploy("prod", &request(&[("acme-ntp", "1.0.0"), ("apache", "2.0.0")]))
        .unwrap();
    assert_eq!(out.publish, PublishStatus::Published);
    assert_eq!(out.modules, request(&[("apache", "2.0.0"), ("ntp", "1.0.0")]));
    assert_eq!(notifier.count(), 1);

    let marker: pem_core::EnvSidecar =
        pem_core::sidecar::read_yaml(&pem.layout().env_dir.join("prod")).unwrap().unwrap();
    assert_eq!(marker.environment, "prod");
    assert_eq!(marker.modules, out.modules);

    let ntp = pem.layout().env_dir.join("prod/modules/ntp");
    assert!(ntp.join("manifests/init.pp").is_file());
    let sidecar: EnvModuleSidecar =
        pem_core::sidecar::read_yaml(&ntp).unwrap().unwrap();
    assert_eq!(sidecar.name, "acme-ntp");
    assert_eq!(sidecar.version, "1.0.0");

    assert_eq!(pem.environments().current_modules("prod").unwrap(), out.modules);
    assert_eq!(pem.environments().list_environments(), vec!["prod".to_string()]);
}

#[test]
fn redeploy_replaces_module_set() {
    let base = tempfile::tempdir().unwrap();
    let pem = pem(base.path(), fetcher(), Arc::new(RecordingNotifier::default()));
    stock(&pem);
    let envs = pem.environments();

    envs.deploy("prod", &request(&[("acme-ntp", "1.0.0"), ("acme-apache", "2.0.0")]))
        .unwrap();
    envs.deploy("prod", &request(&[("acme-ntp", "1.1.0")])).unwrap();

    assert_eq!(envs.current_modules("prod").unwrap(), request(&[("ntp", "1.1.0")]));
    assert!(!envs.root().join("prod/modules/apache").exists());
    assert!(leftovers(envs.root()).is_empty());
}

#[test]
fn failed_redeploy_restores_previous_tree_exactly() {
    let base = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let pem = pem(base.path(), fetcher(), notifier.clone());
    stock(&pem);
    let envs = pem.environments();

    envs.deploy("prod", &request(&[("acme-ntp", "1.0.0"), ("acme-apache", "2.0.0")]))
        .unwrap();
    let before = tree(&envs.root().join("prod"));
    let published_before = notifier.count();

    let err = envs
        .deploy("prod", &request(&[("acme-ntp", "1.1.0"), ("acme-missing", "9.9.9")]))
        .unwrap_err();
    match &err {
        PemError::RolledBack { cause, publish, .. } => {
            assert!(matches!(**cause, PemError::UnknownArtifact { .. }), "{cause}");
            assert_eq!(*publish, PublishStatus::Published);
        }
        other => panic!("expected RolledBack, got {other}"),
    }
    assert_eq!(err.failure_state(), FailureState::Unchanged);

    assert_eq!(tree(&envs.root().join("prod")), before);
    assert_eq!(notifier.count(), published_before + 1);
    assert!(leftovers(envs.root()).is_empty());
    assert_eq!(
        envs.current_modules("prod").unwrap(),
        request(&[("apache", "2.0.0"), ("ntp", "1.0.0")])
    );
}

#[test]
fn failed_first_deploy_leaves_no_environment() {
    let base = tempfile::tempdir().unwrap();
    let pem = pem(base.path(), fetcher(), Arc::new(RecordingNotifier::default()));
    stock(&pem);
    let envs = pem.environments();

    let err = envs
        .deploy("qa", &request(&[("acme-ntp", "1.0.0"), ("acme-ntp2", "1.0.0")]))
        .unwrap_err();
    assert!(matches!(err, PemError::RolledBack { .. }), "{err}");
    assert!(!envs.root().join("qa").exists());
    assert!(envs.list_environments().is_empty());
    assert!(matches!(
        envs.current_modules("qa").unwrap_err(),
        PemError::UnknownEnvironment(_)
    ));
}

#[test]
fn invalid_request_touches_nothing() {
    let base = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let pem = pem(base.path(), fetcher(), notifier.clone());

    let err = pem
        .environments()
        .deploy("../prod", &request(&[("acme-ntp", "1.0.0")]))
        .unwrap_err();
    assert!(matches!(err, PemError::InvalidName { .. }));
    let err = pem
        .environments()
        .deploy("prod", &request(&[("acme-ntp", "../../etc")]))
        .unwrap_err();
    assert!(matches!(err, PemError::InvalidName { .. }));
    assert_eq!(notifier.count(), 0);
    assert!(!pem.layout().env_dir.join("prod").exists());
}

#[test]
fn friendly_name_collision_is_rejected() {
    let base = tempfile::tempdir().unwrap();
    let pem = pem(base.path(), fetcher(), Arc::new(RecordingNotifier::default()));
    stock(&pem);
    pem.modules()
        .deploy("other-ntp", "1.0.0", &ModuleSource::Registry)
        .unwrap();

    let err = pem
        .environments()
        .deploy("prod", &request(&[("acme-ntp", "1.0.0"), ("other-ntp", "1.0.0")]))
        .unwrap_err();
    let PemError::RolledBack { cause, .. } = err else {
        panic!("expected RolledBack");
    };
    assert!(matches!(*cause, PemError::InvalidName { .. }));
}

#[test]
fn publish_failure_keeps_deploy_and_reports_pending() {
    let base = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let pem = pem(base.path(), fetcher(), notifier.clone());
    stock(&pem);
    notifier.fail(true);

    let out = pem
        .environments()
        .deploy("prod", &request(&[("acme-ntp", "1.0.0")]))
        .unwrap();
    assert!(matches!(out.publish, PublishStatus::Pending { ref reason } if reason.contains("503")));
    assert!(pem.layout().env_dir.join("prod/modules/ntp").is_dir());
    assert_eq!(notifier.count(), 1);
}

#[test]
fn rollback_with_failing_publish_is_indeterminate() {
    let base = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let pem = pem(base.path(), fetcher(), notifier.clone());
    stock(&pem);
    pem.environments()
        .deploy("prod", &request(&[("acme-ntp", "1.0.0")]))
        .unwrap();
    notifier.fail(true);

    let err = pem
        .environments()
        .deploy("prod", &request(&[("acme-missing", "1.0.0")]))
        .unwrap_err();
    assert_eq!(err.failure_state(), FailureState::Indeterminate);
    assert_eq!(
        pem.environments().current_modules("prod").unwrap(),
        request(&[("ntp", "1.0.0")])
    );
}

#[test]
fn destroy_is_idempotent_and_publishes() {
    let base = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let pem = pem(base.path(), fetcher(), notifier.clone());
    stock(&pem);
    let envs = pem.environments();
    envs.deploy("prod", &request(&[("acme-ntp", "1.0.0")])).unwrap();

    let first = envs.destroy("prod").unwrap();
    assert!(first.existed);
    assert!(!envs.root().join("prod").exists());
    assert!(leftovers(envs.root()).is_empty());
    assert!(envs.list_environments().is_empty());

    let second = envs.destroy("prod").unwrap();
    assert!(!second.existed);
    assert_eq!(notifier.count(), 3);
    assert!(leftovers(envs.root()).is_empty());
}

/// Write a module directory with its local sidecar under `env_dir`.
fn placed_module(env_dir: &Path, friendly: &str, full: &str, version: &str) {
    let dir = env_dir.join("modules").join(friendly);
    fs::create_dir_all(dir.join("manifests")).unwrap();
    fs::write(dir.join("manifests/init.pp"), format!("class {friendly} {{}}\n")).unwrap();
    fs::write(dir.join(SIDECAR_FILE), format!("version: {version}\nname: {full}\n")).unwrap();
}

#[test]
fn recover_restores_or_discards_stale_backups() {
    let base = tempfile::tempdir().unwrap();
    let env_root = base.path().join("environments");
    // Interrupted mid-rebuild: only the backup of qa survived.
    let qa_backup = env_root.join(".pem-backup-qa-0123456789abcdef0123456789abcdef");
    placed_module(&qa_backup, "ntp", "acme-ntp", "1.0.0");
    // Interrupted after the rebuild: prod is complete, the backup is stale.
    placed_module(&env_root.join("prod"), "ntp", "acme-ntp", "1.1.0");
    fs::write(
        env_root.join("prod").join(SIDECAR_FILE),
        "environment: prod\nmodules:\n  ntp: 1.1.0\n",
    )
    .unwrap();
    let prod_backup = env_root.join(".pem-backup-prod-fedcba9876543210fedcba9876543210");
    placed_module(&prod_backup, "ntp", "acme-ntp", "1.0.0");

    let pem = pem(base.path(), fetcher(), Arc::new(RecordingNotifier::default()));

    assert!(leftovers(&env_root).is_empty());
    assert_eq!(
        pem.environments().current_modules("qa").unwrap(),
        request(&[("ntp", "1.0.0")])
    );
    assert_eq!(
        pem.environments().current_modules("prod").unwrap(),
        request(&[("ntp", "1.1.0")])
    );
    assert_eq!(
        pem.environments().list_environments(),
        vec!["prod".to_string(), "qa".to_string()]
    );
    let report = pem.environments().recover().unwrap();
    assert_eq!(report, RecoveryReport::default());
}

#[test]
fn recover_replaces_half_built_environment_with_backup() {
    let base = tempfile::tempdir().unwrap();
    let env_root = base.path().join("environments");
    // Crash while copying modules: prod has one new module and no
    // environment sidecar, the previous tree is still in its backup.
    let prod_backup = env_root.join(".pem-backup-prod-0123456789abcdef0123456789abcdef");
    placed_module(&prod_backup, "ntp", "acme-ntp", "1.0.0");
    placed_module(&prod_backup, "apache", "acme-apache", "2.0.0");
    placed_module(&env_root.join("prod"), "ntp", "acme-ntp", "1.1.0");

    let pem = pem(base.path(), fetcher(), Arc::new(RecordingNotifier::default()));

    assert!(leftovers(&env_root).is_empty());
    assert_eq!(
        pem.environments().current_modules("prod").unwrap(),
        request(&[("apache", "2.0.0"), ("ntp", "1.0.0")])
    );
}

#[test]
fn crash_after_build_keeps_new_environment() {
    let base = tempfile::tempdir().unwrap();
    let env_root = base.path().join("environments");
    {
        let pem = pem(base.path(), fetcher(), Arc::new(RecordingNotifier::default()));
        stock(&pem);
        pem.environments()
            .deploy("prod", &request(&[("acme-ntp", "1.1.0")]))
            .unwrap();
    }
    // The old tree was not yet discarded when the process stopped.
    let prod_backup = env_root.join(".pem-backup-prod-0123456789abcdef0123456789abcdef");
    placed_module(&prod_backup, "ntp", "acme-ntp", "1.0.0");

    let pem = pem(base.path(), fetcher(), Arc::new(RecordingNotifier::default()));

    assert!(leftovers(&env_root).is_empty());
    assert_eq!(
        pem.environments().current_modules("prod").unwrap(),
        request(&[("ntp", "1.1.0")])
    );
}

#[test]
fn recover_finishes_interrupted_destroy() {
    let base = tempfile::tempdir().unwrap();
    let env_root = base.path().join("environments");
    let retired = env_root.join(".pem-destroy-prod-0123456789abcdef0123456789abcdef");
    placed_module(&retired, "ntp", "acme-ntp", "1.0.0");
    fs::write(retired.join(SIDECAR_FILE), "environment: prod\nmodules:\n  ntp: 1.0.0\n").unwrap();

    let pem = pem(base.path(), fetcher(), Arc::new(RecordingNotifier::default()));

    assert!(leftovers(&env_root).is_empty());
    assert!(!env_root.join("prod").exists());
    assert!(pem.environments().list_environments().is_empty());
}

#[test]
fn concurrent_deploys_of_one_environment_serialize() {
    let base = tempfile::tempdir().unwrap();
    let pem = pem(base.path(), fetcher(), Arc::new(RecordingNotifier::default()));
    stock(&pem);
    let a = request(&[("acme-ntp", "1.0.0"), ("acme-apache", "2.0.0")]);
    let b = request(&[("acme-ntp", "1.1.0")]);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| pem.environments().deploy("prod", &a).unwrap());
            s.spawn(|| pem.environments().deploy("prod", &b).unwrap());
        }
    });

    let now = pem.environments().current_modules("prod").unwrap();
    assert!(
        now == request(&[("apache", "2.0.0"), ("ntp", "1.0.0")]) || now == request(&[("ntp", "1.1.0")]),
        "mixed state: {now:?}"
    );
    assert!(leftovers(pem.environments().root()).is_empty());
}

#[test]
fn archive_packs_environment_tree() {
    let base = tempfile::tempdir().unwrap();
    let pem = pem(base.path(), fetcher(), Arc::new(RecordingNotifier::default()));
    stock(&pem);
    pem.environments()
        .deploy("prod", &request(&[("acme-ntp", "1.0.0")]))
        .unwrap();

    let out = base.path().join("prod.tar.gz");
    pem.environments().archive("prod", &out).unwrap();

    let file = fs::File::open(&out).unwrap();
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let paths: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(paths.iter().any(|p| p == "prod/modules/ntp/manifests/init.pp"), "{paths:?}");

    let err = pem.environments().archive("nope", &out).unwrap_err();
    assert!(matches!(err, PemError::UnknownEnvironment(_)));
}
