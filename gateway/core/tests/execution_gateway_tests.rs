// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the execution gateway
//!
//! Runs executors through a booted container backed by the local cluster
//! binding and checks validation order, impersonation, handle release and
//! instrumentation.

use async_trait::async_trait;
use fsgate_core::application::catalog::ServiceCatalog;
use fsgate_core::application::container::{
    ContainerBuilder, ContainerDirs, ContainerError, ServiceContainer,
};
use fsgate_core::application::execution_gateway::{
    ComputeExecutor, ExecutionGateway, FileSystemExecutor, GatewayError, INSTRUMENTATION_GROUP,
    UNMANAGED_FS,
};
use fsgate_core::application::instrumentation::InstrumentationService;
use fsgate_core::domain::cluster::{ClusterError, ComputeClient, FileSystem};
use fsgate_core::domain::config::Configuration;
use fsgate_core::domain::error::ErrorKind;
use fsgate_core::domain::impersonation::current_user;
use fsgate_core::domain::service::ServiceError;
use fsgate_core::infrastructure::cluster::LocalClusterConnector;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    _home: TempDir,
    container: ServiceContainer,
    connector: Arc<LocalClusterConnector>,
}

impl Harness {
    fn boot(settings: &[(&str, &str)]) -> Self {
        let home = TempDir::new().unwrap();
        let dirs = ContainerDirs::under_home(home.path());
        for dir in [&dirs.config, &dirs.log, &dirs.temp] {
            std::fs::create_dir_all(dir).unwrap();
        }
        let connector = Arc::new(LocalClusterConnector::new(home.path().join("cluster")));

        let mut config = Configuration::from_pairs([("fsgate.services", "instrumentation,gateway")]);
        for (key, value) in settings {
            config.set(*key, *value);
        }
        let container = ContainerBuilder::new("fsgate", dirs)
            .catalog(ServiceCatalog::standard(connector.clone()))
            .config(config)
            .environment(Vec::<(String, String)>::new())
            .build()
            .unwrap();
        container.init().unwrap();

        Self {
            _home: home,
            container,
            connector,
        }
    }

    fn gateway(&self) -> Arc<ExecutionGateway> {
        self.container
            .get_as::<ExecutionGateway>(ExecutionGateway::SERVICE_ID)
            .unwrap()
            .unwrap()
    }

    fn instrumentation(&self) -> Arc<InstrumentationService> {
        self.container
            .get_as::<InstrumentationService>(InstrumentationService::SERVICE_ID)
            .unwrap()
            .unwrap()
    }
}

fn storage(uri: &str) -> Configuration {
    Configuration::from_pairs([("storage.uri", uri)])
}

struct WriteAndList;

#[async_trait]
impl FileSystemExecutor for WriteAndList {
    type Output = Vec<String>;

    async fn execute(&self, fs: &dyn FileSystem) -> anyhow::Result<Vec<String>> {
        fs.mkdirs("/data", None).await?;
        fs.create("/data/a.txt", b"hello", true, None).await?;
        let names = fs
            .list_status("/data")
            .await?
            .into_iter()
            .map(|status| status.path_suffix)
            .collect();
        Ok(names)
    }
}

struct WhoAmI;

#[async_trait]
impl FileSystemExecutor for WhoAmI {
    type Output = (String, Option<String>, Option<String>);

    async fn execute(&self, fs: &dyn FileSystem) -> anyhow::Result<Self::Output> {
        let scope = current_user();
        Ok((
            fs.user().to_string(),
            scope.as_ref().map(|ctx| ctx.effective_user.clone()),
            scope.map(|ctx| ctx.real_user),
        ))
    }
}

struct Failing;

#[async_trait]
impl FileSystemExecutor for Failing {
    type Output = ();

    async fn execute(&self, _fs: &dyn FileSystem) -> anyhow::Result<()> {
        anyhow::bail!("disk on fire")
    }
}

struct Panicking;

#[async_trait]
impl FileSystemExecutor for Panicking {
    type Output = ();

    async fn execute(&self, _fs: &dyn FileSystem) -> anyhow::Result<()> {
        panic!("executor blew up")
    }
}

struct Traversal;

#[async_trait]
impl FileSystemExecutor for Traversal {
    type Output = Vec<u8>;

    async fn execute(&self, fs: &dyn FileSystem) -> anyhow::Result<Vec<u8>> {
        Ok(fs.open("/data/../etc/passwd", 0, None).await?)
    }
}

struct Forbidden;

#[async_trait]
impl FileSystemExecutor for Forbidden {
    type Output = ();

    async fn execute(&self, _fs: &dyn FileSystem) -> anyhow::Result<()> {
        Err(ClusterError::PermissionDenied("/secret".to_string()).into())
    }
}

struct ReRaises;

#[async_trait]
impl FileSystemExecutor for ReRaises {
    type Output = ();

    async fn execute(&self, _fs: &dyn FileSystem) -> anyhow::Result<()> {
        Err(GatewayError::EmptyUser.into())
    }
}

struct Named;

#[async_trait]
impl FileSystemExecutor for Named {
    type Output = ();

    fn name(&self) -> &str {
        "list-status"
    }

    async fn execute(&self, _fs: &dyn FileSystem) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Stalls;

#[async_trait]
impl FileSystemExecutor for Stalls {
    type Output = ();

    async fn execute(&self, fs: &dyn FileSystem) -> anyhow::Result<()> {
        fs.mkdirs("/slow", None).await?;
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

struct Touch(usize);

#[async_trait]
impl FileSystemExecutor for Touch {
    type Output = String;

    async fn execute(&self, fs: &dyn FileSystem) -> anyhow::Result<String> {
        let path = format!("/parallel/{}.txt", self.0);
        fs.create(&path, self.0.to_string().as_bytes(), true, None).await?;
        Ok(fs.file_status(&path).await?.owner)
    }
}

struct JobReport;

#[async_trait]
impl ComputeExecutor for JobReport {
    type Output = (String, u32, bool);

    async fn execute(&self, compute: &dyn ComputeClient, fs: &dyn FileSystem) -> anyhow::Result<Self::Output> {
        let status = compute.cluster_status().await?;
        let created = fs.mkdirs("/jobs", None).await?;
        Ok((status.authority, status.active_nodes, created))
    }
}

#[tokio::test]
async fn test_execute_runs_and_closes_handle() {
    let h = Harness::boot(&[]);
    let names = h
        .gateway()
        .execute("alice", &storage("local://localhost"), &WriteAndList)
        .await
        .unwrap();

    assert_eq!(names, vec!["a.txt".to_string()]);
    assert_eq!(h.connector.opened_handles(), 1);
    assert_eq!(h.connector.closed_handles(), 1);
}

#[tokio::test]
async fn test_missing_locator_is_configuration_error_without_connecting() {
    let h = Harness::boot(&[]);
    let gateway = h.gateway();

    for conf in [Configuration::new(), storage("   ")] {
        let err = gateway.execute("alice", &conf, &WriteAndList).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingLocator("storage.uri")));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
    assert_eq!(h.connector.opened_handles(), 0);
}

#[tokio::test]
async fn test_empty_user_is_rejected() {
    let h = Harness::boot(&[]);
    let err = h
        .gateway()
        .execute(" ", &storage("local://localhost"), &WriteAndList)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::EmptyUser));
    assert_eq!(h.connector.opened_handles(), 0);
}

#[tokio::test]
async fn test_allowlist_rejects_unlisted_authority() {
    let h = Harness::boot(&[("fsgate.gateway.storage.allowlist", "nn1:8020, LocalHost")]);
    let gateway = h.gateway();

    let err = gateway
        .execute("alice", &storage("local://nn2:8020"), &WriteAndList)
        .await
        .unwrap_err();
    match &err {
        GatewayError::NotAllowed { resource, authority } => {
            assert_eq!(*resource, "storage");
            assert_eq!(authority, "nn2:8020");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(h.connector.opened_handles(), 0);

    gateway
        .execute("alice", &storage("local://localhost"), &WriteAndList)
        .await
        .unwrap();
    assert_eq!(h.connector.opened_handles(), 1);
}

#[tokio::test]
async fn test_handle_closed_once_when_executor_fails() {
    let h = Harness::boot(&[]);
    let err = h
        .gateway()
        .execute("alice", &storage("local://localhost"), &Failing)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Execution { ref executor, .. } if executor == "Failing"));
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert!(err.to_string().contains("disk on fire"));
    assert_eq!(h.connector.opened_handles(), 1);
    assert_eq!(h.connector.closed_handles(), 1);
}

#[tokio::test]
async fn test_handle_closed_once_when_executor_panics() {
    let h = Harness::boot(&[]);
    let err = h
        .gateway()
        .execute("alice", &storage("local://localhost"), &Panicking)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::ExecutorPanicked { .. }));
    assert_eq!(h.connector.closed_handles(), 1);

    let snapshot = h.instrumentation().snapshot();
    assert_eq!(snapshot.timers[INSTRUMENTATION_GROUP]["Panicking"].ticks, 1);
}

#[tokio::test]
async fn test_cluster_error_is_kept_as_cause() {
    let h = Harness::boot(&[]);
    let gateway = h.gateway();
    let conf = storage("local://localhost");

    let err = gateway.execute("alice", &conf, &Forbidden).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let err = gateway.execute("alice", &conf, &Traversal).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    match &err {
        GatewayError::Execution { source, .. } => {
            assert!(matches!(
                source.downcast_ref::<ClusterError>(),
                Some(ClusterError::InvalidPath(_))
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.connector.closed_handles(), 2);
}

#[tokio::test]
async fn test_gateway_errors_pass_through_unwrapped() {
    let h = Harness::boot(&[]);
    let err = h
        .gateway()
        .execute("alice", &storage("local://localhost"), &ReRaises)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::EmptyUser));
    assert_eq!(h.connector.closed_handles(), 1);
}

#[tokio::test]
async fn test_executions_are_timed_by_executor_name() {
    let h = Harness::boot(&[]);
    let gateway = h.gateway();
    let conf = storage("local://localhost");

    gateway.execute("alice", &conf, &WriteAndList).await.unwrap();
    gateway.execute("alice", &conf, &WriteAndList).await.unwrap();
    gateway.execute("alice", &conf, &Failing).await.unwrap_err();
    gateway.execute("alice", &conf, &Named).await.unwrap();

    let snapshot = h.instrumentation().snapshot();
    let timers = &snapshot.timers[INSTRUMENTATION_GROUP];
    assert_eq!(timers["WriteAndList"].ticks, 2);
    assert_eq!(timers["Failing"].ticks, 1);
    assert_eq!(timers["list-status"].ticks, 1);
    assert!(timers["WriteAndList"].avg_total_ms >= 0.0);
}

#[tokio::test]
async fn test_executor_runs_as_effective_user() {
    let h = Harness::boot(&[]);
    let (fs_user, effective, real) = h
        .gateway()
        .execute("bob", &storage("local://localhost"), &WhoAmI)
        .await
        .unwrap();

    assert_eq!(fs_user, "bob");
    assert_eq!(effective.as_deref(), Some("bob"));
    assert_eq!(real.as_deref(), Some("fsgate"));
    assert!(current_user().is_none());
}

#[tokio::test]
async fn test_default_cluster_configuration_is_merged_under_call() {
    let h = Harness::boot(&[
        ("fsgate.gateway.conf:storage.uri", "local://defaulted"),
        ("fsgate.gateway.conf:io.buffer", "4096"),
    ]);
    let gateway = h.gateway();

    let defaults = gateway.default_configuration().unwrap();
    assert_eq!(defaults.get("io.buffer").as_deref(), Some("4096"));

    let mut conf = gateway.default_configuration().unwrap();
    conf.set("storage.uri", "local://localhost");
    gateway.execute("alice", &conf, &WriteAndList).await.unwrap();
    assert!(h.connector.root().join("localhost").join("data").is_dir());
    assert!(!h.connector.root().join("defaulted").exists());
}

#[tokio::test]
async fn test_paired_execution_opens_and_closes_both_handles() {
    let h = Harness::boot(&[]);
    let mut conf = storage("local://localhost");
    conf.set("compute.uri", "local://rm:8032");

    let (authority, nodes, created) = h
        .gateway()
        .execute_with_compute("alice", &conf, &JobReport)
        .await
        .unwrap();
    assert_eq!(authority, "rm:8032");
    assert_eq!(nodes, 1);
    assert!(created);
    assert_eq!(h.connector.opened_handles(), 2);
    assert_eq!(h.connector.closed_handles(), 2);

    let snapshot = h.instrumentation().snapshot();
    assert_eq!(snapshot.timers[INSTRUMENTATION_GROUP]["JobReport"].ticks, 1);
}

#[tokio::test]
async fn test_paired_execution_checks_both_allowlists() {
    let h = Harness::boot(&[("fsgate.gateway.compute.allowlist", "rm:8032")]);
    let gateway = h.gateway();

    let mut conf = storage("local://localhost");
    let err = gateway.execute_with_compute("alice", &conf, &JobReport).await.unwrap_err();
    assert!(matches!(err, GatewayError::MissingLocator("compute.uri")));

    conf.set("compute.uri", "local://rogue:8032");
    let err = gateway.execute_with_compute("alice", &conf, &JobReport).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotAllowed { resource: "compute", .. }));

    conf.set("compute.uri", "local://rm:8032");
    conf.unset("storage.uri");
    let err = gateway.execute_with_compute("alice", &conf, &JobReport).await.unwrap_err();
    assert!(matches!(err, GatewayError::MissingLocator("storage.uri")));
    assert_eq!(h.connector.opened_handles(), 0);
}

#[tokio::test]
async fn test_unmanaged_gauge_tracks_outstanding_handles() {
    let h = Harness::boot(&[]);
    let gateway = h.gateway();
    let instrumentation = h.instrumentation();
    let conf = storage("local://localhost");

    let first = gateway.create_unmanaged_resource("alice", &conf).await.unwrap();
    let second = gateway.create_unmanaged_resource("bob", &conf).await.unwrap();
    assert_eq!(gateway.unmanaged_count(), 2);
    assert_eq!(second.fs().user(), "bob");
    assert_eq!(
        instrumentation.snapshot().variables[INSTRUMENTATION_GROUP][UNMANAGED_FS],
        2
    );

    first.fs().mkdirs("/scratch", None).await.unwrap();
    gateway.release_resource(first).await.unwrap();
    assert_eq!(gateway.unmanaged_count(), 1);
    gateway.release_resource(second).await.unwrap();
    assert_eq!(gateway.unmanaged_count(), 0);
    assert_eq!(h.connector.closed_handles(), 2);

    instrumentation.sample_now();
    let snapshot = instrumentation.snapshot();
    assert_eq!(snapshot.variables[INSTRUMENTATION_GROUP][UNMANAGED_FS], 0);
    assert!(snapshot.samplers[INSTRUMENTATION_GROUP].contains_key(UNMANAGED_FS));
}

async fn wait_for_closed(connector: &LocalClusterConnector, expected: usize) {
    for _ in 0..100 {
        if connector.closed_handles() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} closed handles, found {}",
        connector.closed_handles()
    );
}

#[tokio::test]
async fn test_cancelled_call_closes_handle() {
    let h = Harness::boot(&[]);
    let gateway = h.gateway();
    let conf = storage("local://localhost");

    let call = gateway.execute("alice", &conf, &Stalls);
    let outcome = tokio::time::timeout(Duration::from_millis(50), call).await;
    assert!(outcome.is_err());

    assert_eq!(h.connector.opened_handles(), 1);
    wait_for_closed(&h.connector, 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_share_gauge_and_close_every_handle() {
    let h = Harness::boot(&[]);
    let gateway = h.gateway();
    let conf = storage("local://localhost");

    let mut tasks = Vec::new();
    for n in 0..16 {
        let gateway = Arc::clone(&gateway);
        let conf = conf.clone();
        tasks.push(tokio::spawn(async move {
            let user = format!("user{n}");
            let owner = gateway.execute(&user, &conf, &Touch(n)).await.unwrap();
            assert_eq!(owner, user);

            let handle = gateway.create_unmanaged_resource(&user, &conf).await.unwrap();
            assert_eq!(handle.fs().user(), user);
            assert!(gateway.unmanaged_count() >= 1);
            gateway.release_resource(handle).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(gateway.unmanaged_count(), 0);
    assert_eq!(h.connector.opened_handles(), 32);
    assert_eq!(h.connector.closed_handles(), h.connector.opened_handles());
    let snapshot = h.instrumentation().snapshot();
    assert_eq!(snapshot.timers[INSTRUMENTATION_GROUP]["Touch"].ticks, 16);
}

#[tokio::test]
async fn test_failed_unmanaged_creation_does_not_count() {
    let h = Harness::boot(&[("fsgate.gateway.storage.allowlist", "nn1:8020")]);
    let gateway = h.gateway();

    let err = gateway
        .create_unmanaged_resource("alice", &storage("local://localhost"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(gateway.unmanaged_count(), 0);
}

#[tokio::test]
async fn test_calls_fail_after_destroy() {
    let h = Harness::boot(&[]);
    let gateway = h.gateway();
    h.container.destroy().unwrap();

    let err = gateway
        .execute("alice", &storage("local://localhost"), &WriteAndList)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotInitialized));
    assert_eq!(err.kind(), ErrorKind::State);
}

fn boot_error(settings: &[(&str, &str)]) -> ContainerError {
    let home = TempDir::new().unwrap();
    let dirs = ContainerDirs::under_home(home.path());
    for dir in [&dirs.config, &dirs.log, &dirs.temp] {
        std::fs::create_dir_all(dir).unwrap();
    }
    let mut config = Configuration::from_pairs([("fsgate.services", "instrumentation,gateway")]);
    for (key, value) in settings {
        config.set(*key, *value);
    }
    let container = ContainerBuilder::new("fsgate", dirs)
        .catalog(ServiceCatalog::standard(Arc::new(LocalClusterConnector::new(
            home.path().join("cluster"),
        ))))
        .config(config)
        .environment(Vec::<(String, String)>::new())
        .build()
        .unwrap();
    container.init().unwrap_err()
}

#[test]
fn test_kerberos_requires_readable_keytab() {
    let err = boot_error(&[("fsgate.gateway.authentication.type", "kerberos")]);
    match err {
        ContainerError::Init { source: ServiceError::KerberosLogin { principal, keytab, .. }, .. } => {
            assert_eq!(principal, "fsgate/localhost@LOCALHOST");
            assert!(keytab.ends_with("fsgate.keytab"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_kerberos_blank_principal_is_missing_property() {
    let err = boot_error(&[
        ("fsgate.gateway.authentication.type", "kerberos"),
        ("fsgate.gateway.authentication.kerberos.principal", " "),
    ]);
    assert!(matches!(
        err,
        ContainerError::Init { source: ServiceError::MissingProperty(ref key), .. }
            if key == "fsgate.gateway.authentication.kerberos.principal"
    ));
}

#[test]
fn test_unknown_authentication_type_is_rejected() {
    let err = boot_error(&[("fsgate.gateway.authentication.type", "ntlm")]);
    assert!(matches!(
        err,
        ContainerError::Init { source: ServiceError::InvalidProperty { .. }, .. }
    ));
}

#[test]
fn test_kerberos_login_uses_principal_short_name() {
    let home = TempDir::new().unwrap();
    let dirs = ContainerDirs::under_home(home.path());
    for dir in [&dirs.config, &dirs.log, &dirs.temp] {
        std::fs::create_dir_all(dir).unwrap();
    }
    let keytab = home.path().join("svc.keytab");
    std::fs::write(&keytab, b"keytab").unwrap();

    let container = ContainerBuilder::new("fsgate", dirs)
        .catalog(ServiceCatalog::standard(Arc::new(LocalClusterConnector::new(
            home.path().join("cluster"),
        ))))
        .config(Configuration::from_pairs([
            ("fsgate.services", "instrumentation,gateway".to_string()),
            ("fsgate.gateway.authentication.type", "kerberos".to_string()),
            ("fsgate.gateway.authentication.kerberos.keytab", keytab.display().to_string()),
            ("fsgate.gateway.authentication.kerberos.principal", "svc/gw.example.com@EXAMPLE.COM".to_string()),
        ]))
        .environment(Vec::<(String, String)>::new())
        .build()
        .unwrap();
    container.init().unwrap();

    let gateway = container
        .get_as::<ExecutionGateway>(ExecutionGateway::SERVICE_ID)
        .unwrap()
        .unwrap();
    assert_eq!(gateway.login_user().unwrap(), "svc");
}
