use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_compression::tokio::write::BzEncoder;
use respawn_core::{
    ErrorClass, Mode, RestartPhase, Restarter, RunningIdentity, Scheduler, UpdateError,
    UpdateOutcome, Updater, UpdaterConfig,
};
use respawn_platform::Target;
use tempfile::{TempDir, tempdir};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RUNNING_TAG: &str = "aaaaaaa";
const RUNNING_DATE: &str = "20240101000000";
const NEXT_POINTER: &str = "20240301000000 bbbbbbb agent_stable_20240301000000_bbbbbbb\n";
const NEXT_ARCH: &str = "/agent/agent_stable_20240301000000_bbbbbbb.arch";
const NEXT_ARTIFACT: &str = "/agent/agent_stable_20240301000000_bbbbbbb/agent_linux_amd64.bz2";

#[derive(Default)]
struct RecordingRestarter {
    restarts: Mutex<Vec<PathBuf>>,
}

impl RecordingRestarter {
    fn count(&self) -> usize {
        self.restarts.lock().expect("restarts lock").len()
    }
}

impl Restarter for RecordingRestarter {
    fn restart(&self, executable: &Path, _delay: Duration) -> Result<(), UpdateError> {
        self.restarts
            .lock()
            .expect("restarts lock")
            .push(executable.to_path_buf());
        Ok(())
    }
}

struct Harness {
    server: MockServer,
    dir: TempDir,
    exe: PathBuf,
    restarter: Arc<RecordingRestarter>,
}

impl Harness {
    async fn start() -> Self {
        let server = MockServer::start().await;
        let dir = tempdir().expect("create temp dir");
        let exe = dir.path().join("agent");
        std::fs::write(&exe, b"old build").expect("write running executable");
        Self {
            server,
            dir,
            exe,
            restarter: Arc::new(RecordingRestarter::default()),
        }
    }

    fn identity(&self) -> RunningIdentity {
        RunningIdentity::new("agent", RUNNING_TAG, RUNNING_DATE)
            .with_host(self.server.uri())
            .with_mode(Mode::Production)
    }

    fn config(&self) -> UpdaterConfig {
        UpdaterConfig {
            executable: Some(self.exe.clone()),
            target: Target::new("linux", "amd64"),
            restart_delay: Duration::from_secs(2),
            ..UpdaterConfig::default()
        }
    }

    fn updater(&self, identity: RunningIdentity, config: UpdaterConfig) -> Arc<Updater> {
        Updater::builder(identity)
            .config(config)
            .restarter(self.restarter.clone())
            .build()
            .expect("updater should build")
    }

    fn default_updater(&self) -> Arc<Updater> {
        self.updater(self.identity(), self.config())
    }

    fn exe_contents(&self) -> Vec<u8> {
        std::fs::read(&self.exe).expect("read executable")
    }

    fn dir_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .expect("list temp dir")
            .map(|entry| {
                entry
                    .expect("dir entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        names
    }

    async fn mount(&self, route: &str, response: ResponseTemplate, expected: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .expect(expected)
            .mount(&self.server)
            .await;
    }

    async fn latest_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == "/agent/LATEST")
            .count()
    }
}

async fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut encoder = BzEncoder::new(Vec::new());
    encoder.write_all(data).await.expect("encode artifact");
    encoder.shutdown().await.expect("finish artifact");
    encoder.into_inner()
}

fn text(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(body)
}

#[tokio::test]
async fn up_to_date_check_downloads_nothing() {
    let harness = Harness::start().await;
    harness
        .mount(
            "/agent/LATEST",
            text("20240101000000 aaaaaaa agent_stable_20240101000000_aaaaaaa"),
            1,
        )
        .await;
    harness
        .mount("/agent/agent_stable_20240101000000_aaaaaaa.arch", text("linux_amd64"), 0)
        .await;

    let outcome = harness
        .default_updater()
        .check_for_update()
        .await
        .expect("check should succeed");

    assert!(matches!(outcome, UpdateOutcome::UpToDate(version) if version.git_tag == RUNNING_TAG));
    assert_eq!(harness.exe_contents(), b"old build");
    assert_eq!(harness.restarter.count(), 0);
}

#[tokio::test]
async fn new_build_is_installed_then_restarted() {
    let harness = Harness::start().await;
    harness.mount("/agent/LATEST", text(NEXT_POINTER), 1).await;
    harness
        .mount(NEXT_ARCH, text("darwin_arm64\nlinux_amd64\nwindows_amd64\n"), 1)
        .await;
    harness
        .mount(
            NEXT_ARTIFACT,
            ResponseTemplate::new(200).set_body_bytes(bzip2(b"new build").await),
            1,
        )
        .await;

    let seen_by_hook = Arc::new(Mutex::new(Vec::new()));
    let updater = {
        let exe = harness.exe.clone();
        let seen = Arc::clone(&seen_by_hook);
        Updater::builder(harness.identity())
            .config(harness.config())
            .restarter(harness.restarter.clone())
            .pre_restart(Arc::new(move || {
                let contents = std::fs::read(&exe).map_err(|err| err.to_string())?;
                *seen.lock().expect("hook lock") = contents;
                Ok(())
            }))
            .build()
            .expect("updater should build")
    };

    let outcome = updater
        .check_for_update()
        .await
        .expect("update should succeed");

    assert!(matches!(outcome, UpdateOutcome::Restarted(version) if version.git_tag == "bbbbbbb"));
    assert_eq!(harness.exe_contents(), b"new build");
    assert_eq!(*seen_by_hook.lock().expect("hook lock"), b"new build");
    assert_eq!(harness.restarter.count(), 1);
    assert_eq!(updater.restart_phase(), RestartPhase::Restarted);
    assert_eq!(harness.dir_entries(), vec!["agent"]);
}

#[tokio::test]
async fn missing_platform_stops_before_download() {
    let harness = Harness::start().await;
    harness.mount("/agent/LATEST", text(NEXT_POINTER), 1).await;
    harness.mount(NEXT_ARCH, text("darwin_arm64\nlinux_arm64\n"), 1).await;
    harness
        .mount(NEXT_ARTIFACT, ResponseTemplate::new(200), 0)
        .await;

    let error = harness
        .default_updater()
        .check_for_update()
        .await
        .expect_err("linux_amd64 is not published");

    assert_eq!(error.class(), ErrorClass::Compatibility);
    assert_eq!(harness.exe_contents(), b"old build");
    assert_eq!(harness.restarter.count(), 0);
}

#[tokio::test]
async fn malformed_pointer_leaves_the_filesystem_alone() {
    let harness = Harness::start().await;
    harness
        .mount("/agent/LATEST", text("20240301000000 bbbbbbb"), 1)
        .await;
    let before = harness.dir_entries();

    let error = harness
        .default_updater()
        .check_for_update()
        .await
        .expect_err("two fields are not a pointer");

    assert_eq!(error.class(), ErrorClass::Protocol);
    assert_eq!(harness.dir_entries(), before);
    assert_eq!(harness.exe_contents(), b"old build");
}

#[tokio::test]
async fn failed_download_keeps_the_running_build() {
    let harness = Harness::start().await;
    harness.mount("/agent/LATEST", text(NEXT_POINTER), 1).await;
    harness.mount(NEXT_ARCH, text("linux_amd64"), 1).await;
    harness
        .mount(NEXT_ARTIFACT, ResponseTemplate::new(200).set_body_bytes(b"truncated".to_vec()), 1)
        .await;

    let error = harness
        .default_updater()
        .check_for_update()
        .await
        .expect_err("corrupt artifact should fail the install");

    assert_eq!(error.class(), ErrorClass::Filesystem);
    assert_eq!(harness.exe_contents(), b"old build");
    assert_eq!(harness.dir_entries(), vec!["agent"]);
    assert_eq!(harness.restarter.count(), 0);
}

#[tokio::test]
async fn unconfigured_project_makes_no_requests() {
    let harness = Harness::start().await;
    let identity = RunningIdentity::from_build(None, Some("aaaaaaa0123"), None)
        .with_host(harness.server.uri());

    let error = harness
        .updater(identity, harness.config())
        .check_for_update()
        .await
        .expect_err("unconfigured builds cannot update");

    assert_eq!(error.class(), ErrorClass::Configuration);
    assert!(
        harness
            .server
            .received_requests()
            .await
            .unwrap_or_default()
            .is_empty()
    );
}

#[tokio::test]
async fn concurrent_checks_share_one_attempt() {
    let harness = Harness::start().await;
    harness
        .mount(
            "/agent/LATEST",
            text("20240101000000 aaaaaaa agent_stable_20240101000000_aaaaaaa")
                .set_delay(Duration::from_millis(300)),
            1,
        )
        .await;
    let updater = harness.default_updater();

    let (first, second) = tokio::join!(updater.check_for_update(), updater.check_for_update());

    let mut outcomes = vec![
        first.expect("first check should succeed"),
        second.expect("second check should succeed"),
    ];
    outcomes.sort_by_key(|outcome| matches!(outcome, UpdateOutcome::UpToDate(_)));
    assert_eq!(outcomes[0], UpdateOutcome::AlreadyRunning);
    assert!(matches!(outcomes[1], UpdateOutcome::UpToDate(_)));
}

#[tokio::test]
async fn switching_to_the_running_channel_is_a_no_op() {
    let harness = Harness::start().await;
    harness
        .mount(
            "/agent/LATEST",
            text("20240101000000 aaaaaaa agent_stable_20240101000000_aaaaaaa"),
            1,
        )
        .await;
    let updater = harness.default_updater();

    let switched = updater
        .switch_channel("stable")
        .await
        .expect("switch should succeed");

    assert!(!switched);
    assert_eq!(updater.identity().channel(), "stable");
    assert_eq!(harness.restarter.count(), 0);
}

#[tokio::test]
async fn switching_channel_installs_even_the_same_build() {
    let harness = Harness::start().await;
    harness
        .mount(
            "/agent/LATEST-beta",
            text("20240101000000 aaaaaaa agent_beta_20240101000000_aaaaaaa"),
            1,
        )
        .await;
    harness
        .mount("/agent/agent_beta_20240101000000_aaaaaaa.arch", text("linux_amd64"), 1)
        .await;
    harness
        .mount(
            "/agent/agent_beta_20240101000000_aaaaaaa/agent_linux_amd64.bz2",
            ResponseTemplate::new(200).set_body_bytes(bzip2(b"beta build").await),
            1,
        )
        .await;
    let updater = harness.default_updater();

    let switched = updater
        .switch_channel("beta")
        .await
        .expect("switch should succeed");

    assert!(switched);
    assert_eq!(updater.identity().channel(), "beta");
    assert_eq!(harness.exe_contents(), b"beta build");
    assert_eq!(harness.restarter.count(), 1);
}

#[tokio::test]
async fn failed_switch_keeps_the_running_channel() {
    let harness = Harness::start().await;
    harness
        .mount(
            "/agent/LATEST-beta",
            text("20240301000000 ccccccc agent_beta_20240301000000_ccccccc"),
            1,
        )
        .await;
    harness
        .mount("/agent/agent_beta_20240301000000_ccccccc.arch", text("windows_amd64"), 1)
        .await;
    let updater = harness.default_updater();

    let error = updater
        .switch_channel("beta")
        .await
        .expect_err("beta has no linux build");

    assert_eq!(error.class(), ErrorClass::Compatibility);
    assert_eq!(updater.identity().channel(), "stable");
    assert_eq!(harness.exe_contents(), b"old build");
}

#[tokio::test]
async fn save_as_writes_a_build_next_to_the_running_one() {
    let harness = Harness::start().await;
    harness.mount("/agent/LATEST", text(NEXT_POINTER), 1).await;
    harness.mount(NEXT_ARCH, text("linux_amd64"), 1).await;
    harness
        .mount(
            NEXT_ARTIFACT,
            ResponseTemplate::new(200).set_body_bytes(bzip2(b"new build").await),
            1,
        )
        .await;
    let output = harness.dir.path().join("agent-next");
    std::fs::write(&output, b"").expect("create output file");
    let updater = harness.default_updater();

    let version = updater.latest("stable").await.expect("resolve latest");
    updater
        .save_as(&version, &output)
        .await
        .expect("save should succeed");

    assert_eq!(std::fs::read(&output).expect("read output"), b"new build");
    assert_eq!(harness.exe_contents(), b"old build");
    assert_eq!(harness.restarter.count(), 0);
}

#[tokio::test]
async fn only_newer_peers_queue_a_check() {
    let harness = Harness::start().await;
    let updater = harness.default_updater();

    assert!(!updater.report_peer_version(RUNNING_TAG, "20250101000000"));
    assert!(!updater.report_peer_version("bbbbbbb", "20230101000000"));
    assert!(!updater.report_peer_version("bbbbbbb", RUNNING_DATE));
    assert!(!updater.report_peer_version("", "20250101000000"));
    assert!(updater.report_peer_version("bbbbbbb", "20240102000000"));
}

#[tokio::test]
async fn scheduler_checks_after_initial_delay_and_on_trigger() {
    let harness = Harness::start().await;
    harness
        .mount(
            "/agent/LATEST",
            text("20240101000000 aaaaaaa agent_stable_20240101000000_aaaaaaa"),
            2,
        )
        .await;
    let config = UpdaterConfig {
        initial_delay: Duration::from_millis(50),
        check_interval: Duration::from_secs(3600),
        ..harness.config()
    };
    let updater = harness.updater(harness.identity(), config);
    let cancel = CancellationToken::new();

    let scheduler = Scheduler::new(Arc::clone(&updater), false).expect("first scheduler");
    assert!(Scheduler::new(Arc::clone(&updater), false).is_none());
    let handle = scheduler
        .spawn(cancel.clone())
        .expect("production builds run the loop");

    wait_for_latest_requests(&harness, 1).await;
    updater.trigger_check();
    wait_for_latest_requests(&harness, 2).await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop on cancel")
        .expect("loop task should not panic");
}

#[tokio::test]
async fn zero_check_interval_does_not_stop_the_loop() {
    let harness = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/agent/LATEST"))
        .respond_with(text("20240101000000 aaaaaaa agent_stable_20240101000000_aaaaaaa"))
        .expect(1..)
        .mount(&harness.server)
        .await;
    let config = UpdaterConfig {
        initial_delay: Duration::from_millis(50),
        check_interval: Duration::ZERO,
        ..harness.config()
    };
    let updater = harness.updater(harness.identity(), config);
    let cancel = CancellationToken::new();

    let handle = Scheduler::new(Arc::clone(&updater), false)
        .expect("first scheduler")
        .spawn(cancel.clone())
        .expect("production builds run the loop");

    wait_for_latest_requests(&harness, 1).await;
    assert!(!handle.is_finished(), "loop keeps running after a check");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop on cancel")
        .expect("loop task should not panic");
}

#[tokio::test]
async fn scheduler_stays_off_outside_production() {
    let harness = Harness::start().await;
    let identity = harness.identity().with_mode(Mode::Development);
    let updater = harness.updater(identity, harness.config());

    let scheduler = Scheduler::new(updater, false).expect("first scheduler");
    assert!(scheduler.spawn(CancellationToken::new()).is_none());
}

async fn wait_for_latest_requests(harness: &Harness, expected: usize) {
    for _ in 0..100 {
        if harness.latest_requests().await >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("expected {expected} LATEST request(s)");
}
