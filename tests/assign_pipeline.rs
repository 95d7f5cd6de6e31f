use scribepool::{
    Asset, Config, Marketplace, MemoryRemote, MockMarketplace, Project, RunContext, ScribepoolError, Template,
    UploadStatus, assign,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const BASE: &str = "https://example.com/up";

struct Fixture {
    _dir: TempDir,
    project: Project,
    template: Template,
    remote: Arc<MemoryRemote>,
    market: MockMarketplace,
}

impl Fixture {
    fn new(chunks: &[&str]) -> Self {
        Self::with_remote(chunks, BASE)
    }

    fn with_remote(chunks: &[&str], base: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("audio");
        fs::create_dir_all(&audio).unwrap();
        let files: Vec<PathBuf> = chunks
            .iter()
            .map(|name| {
                let path = audio.join(name);
                fs::write(&path, format!("audio bytes of {name}")).unwrap();
                path
            })
            .collect();
        let project = Project::create(dir.path().join("interview"), "proj1", &files).unwrap();

        Self {
            _dir: dir,
            project,
            template: Template::new(
                "basic",
                "<audio src=\"{{remote_asset_url}}\"></audio><p>chunk {{id}}</p>",
            ),
            remote: Arc::new(MemoryRemote::new(base).unwrap()),
            market: MockMarketplace::new(),
        }
    }

    fn ctx(&self, config: Config, sandbox: bool) -> RunContext {
        RunContext::new(
            config,
            Box::new(self.remote.clone()),
            Box::new(self.market.clone()),
        )
        .with_sandbox(sandbox)
    }

    async fn run(&self) -> scribepool::Result<scribepool::AssignReport> {
        assign(&self.project, &self.template, &self.ctx(config(), false)).await
    }
}

fn config() -> Config {
    Config::from_toml_str(
        r#"
[assignment]
reward = 0.75
keywords = ["transcription", "mp3"]
deadline = "20m"
qualify = ["approval_rate >= 95"]
"#,
    )
    .unwrap()
}

#[tokio::test]
async fn assigns_every_row_and_records_it() {
    let fx = Fixture::new(&["c00.mp3", "c01.mp3", "c02.mp3"]);

    let report = fx.run().await.unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.submitted, 3);
    assert_eq!(report.uploaded, 6);
    assert_eq!(report.to_string(), "Assigned 3 / 3");

    let store = fx.project.records(false).unwrap();
    let ids: Vec<&str> = store.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["c00", "c01", "c02"]);
    for (record, task_id) in store.iter().zip(&report.task_ids) {
        assert_eq!(&record.task_id, task_id);
        assert_eq!(record.status(Asset::Audio), UploadStatus::Yes);
        assert_eq!(record.status(Asset::Assignment), UploadStatus::Yes);
        assert!(fx.remote.is_reachable(&record.remote_asset_url));
        assert!(fx.remote.is_reachable(&record.assignment_url));
    }

    let c00 = store.get("c00").unwrap();
    assert_eq!(c00.remote_asset_url, "https://example.com/up/proj1-c00.mp3");
    let page = String::from_utf8(fx.remote.contents("proj1-c00.html").unwrap()).unwrap();
    assert_eq!(
        page,
        "<audio src=\"https://example.com/up/proj1-c00.mp3\"></audio><p>chunk c00</p>"
    );

    let tasks = fx.market.tasks();
    assert_eq!(tasks.len(), 3);
    assert_eq!(tasks[0].payload, c00.assignment_url);
    assert_eq!(tasks[0].options.project_id, "proj1");
    assert_eq!(tasks[0].options.reward.cents(), 75);
    assert_eq!(tasks[0].options.deadline_secs, 1200);
    assert_eq!(tasks[0].options.keywords, vec!["transcription", "mp3"]);
    assert_eq!(tasks[0].options.qualifications.len(), 1);
    assert!(!tasks[0].options.sandbox);
}

#[tokio::test]
async fn second_create_failure_rolls_back_first_task() {
    let fx = Fixture::new(&["c00.mp3", "c01.mp3", "c02.mp3"]);
    let fx = Fixture {
        market: fx.market.clone().fail_create_on(2),
        ..fx
    };

    let err = fx.run().await.unwrap_err();
    assert!(matches!(err, ScribepoolError::Marketplace { .. }));
    assert!(err.to_string().contains("creating task #2"), "{err}");

    assert_eq!(fx.market.disable_log(), vec!["TASK0001"]);
    assert!(fx.market.tasks()[0].disabled);

    // Local state is not rolled back: row 1 still shows its task.
    let store = fx.project.records(false).unwrap();
    assert_eq!(store.get("c00").unwrap().task_id, "TASK0001");
    assert!(store.get("c01").unwrap().is_unassigned());
    assert!(store.get("c02").unwrap().is_unassigned());
    assert!(store.iter().all(|r| !r.needs_upload()));
}

#[tokio::test]
async fn rerun_after_rollback_only_assigns_rows_still_unassigned() {
    let fx = Fixture::new(&["c00.mp3", "c01.mp3", "c02.mp3"]);
    let fx = Fixture {
        market: fx.market.clone().fail_create_on(2),
        ..fx
    };
    fx.run().await.unwrap_err();
    let uploads_after_first_run = fx.remote.put_log();
    assert_eq!(uploads_after_first_run.len(), 6);

    fx.market.heal();
    let report = fx.run().await.unwrap();
    assert_eq!(report.submitted, 2);
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.to_string(), "Assigned 2 / 3");
    assert_eq!(fx.remote.put_log(), uploads_after_first_run);

    // The disabled task keeps its row; nothing posts it again.
    let store = fx.project.records(false).unwrap();
    assert_eq!(store.get("c00").unwrap().task_id, "TASK0001");
    assert!(store.iter().all(|r| !r.is_unassigned()));
    let c00_url = &store.get("c00").unwrap().assignment_url;
    let posts = fx.market.tasks().iter().filter(|t| &t.payload == c00_url).count();
    assert_eq!(posts, 1);
}

#[tokio::test]
async fn finished_tasks_are_not_posted_again() {
    let fx = Fixture::new(&["c00.mp3"]);
    fx.run().await.unwrap();

    // The task leaves the live list, as it would once completed or expired.
    let task = fx.market.tasks()[0].task.clone();
    fx.market.disable_task(&task).await.unwrap();
    assert!(fx.market.list_tasks_for_project("proj1").await.unwrap().is_empty());

    let err = fx.run().await.unwrap_err();
    assert!(err.to_string().contains("already assigned"), "{err}");
    assert_eq!(fx.market.create_calls(), 1);
}

#[tokio::test]
async fn confirmed_uploads_are_not_repeated() {
    let fx = Fixture::new(&["c00.mp3", "c01.mp3"]);
    let fx = Fixture {
        market: fx.market.clone().fail_create_on(1),
        ..fx
    };

    fx.run().await.unwrap_err();
    assert_eq!(fx.remote.put_log().len(), 4);
    assert!(fx.market.disable_log().is_empty());

    fx.market.heal();
    fx.run().await.unwrap();
    assert_eq!(fx.remote.put_log().len(), 4);
}

#[tokio::test]
async fn rollback_swallows_disable_failures_in_reverse_order() {
    let fx = Fixture::new(&["c00.mp3", "c01.mp3", "c02.mp3"]);
    let fx = Fixture {
        market: fx.market.clone().fail_create_on(3).fail_disable(),
        ..fx
    };

    let err = fx.run().await.unwrap_err();
    assert!(err.to_string().contains("creating task #3"), "{err}");
    assert_eq!(fx.market.disable_log(), vec!["TASK0002", "TASK0001"]);
}

#[tokio::test]
async fn plain_http_base_is_rejected_before_any_network_call() {
    let fx = Fixture::with_remote(&["c00.mp3"], "http://example.com/up");

    let err = fx.run().await.unwrap_err();
    assert!(matches!(err, ScribepoolError::ConfigInvalidValue { .. }));
    assert!(err.to_string().contains("must begin with 'https'"));
    assert!(fx.remote.put_log().is_empty());
    assert_eq!(fx.market.create_calls(), 0);

    let store = fx.project.records(false).unwrap();
    assert!(store.iter().all(|r| r.status(Asset::Audio) == UploadStatus::No));
}

#[tokio::test]
async fn failed_upload_leaves_maybe_and_is_fixed_by_rerun() {
    let fx = Fixture::new(&["c00.mp3", "c01.mp3"]);
    fx.remote.set_fail_after(Some(1));

    let err = fx.run().await.unwrap_err();
    assert!(matches!(err, ScribepoolError::RemoteOperation { .. }));
    assert_eq!(fx.market.create_calls(), 0);

    let store = fx.project.records(false).unwrap();
    let c00 = store.get("c00").unwrap();
    assert_eq!(c00.status(Asset::Audio), UploadStatus::Yes);
    assert_eq!(c00.status(Asset::Assignment), UploadStatus::Maybe);
    assert!(!c00.assignment_url.is_empty());
    assert!(!fx.remote.is_reachable(&c00.assignment_url));
    assert_eq!(
        store.get("c01").unwrap().status(Asset::Audio),
        UploadStatus::No
    );

    fx.remote.set_fail_after(None);
    let report = fx.run().await.unwrap();
    assert_eq!(report.uploaded, 3);

    let store = fx.project.records(false).unwrap();
    let c00 = store.get("c00").unwrap();
    assert_eq!(c00.status(Asset::Assignment), UploadStatus::Yes);
    assert!(fx.remote.is_reachable(&c00.assignment_url));
    let audio_puts = fx
        .remote
        .put_log()
        .iter()
        .filter(|name| name.as_str() == "proj1-c00.mp3")
        .count();
    assert_eq!(audio_puts, 1);
}

#[tokio::test]
async fn recorded_urls_from_another_remote_abort_the_run() {
    let fx = Fixture::new(&["c00.mp3", "c01.mp3"]);
    let fx = Fixture {
        market: fx.market.clone().fail_create_on(1),
        ..fx
    };
    fx.run().await.unwrap_err();

    let moved = Arc::new(MemoryRemote::new("https://other.example.com/up").unwrap());
    let ctx = RunContext::new(config(), Box::new(moved.clone()), Box::new(fx.market.clone()));
    let err = assign(&fx.project, &fx.template, &ctx).await.unwrap_err();
    assert!(matches!(err, ScribepoolError::ConfigMismatch { .. }));
    assert!(
        err.to_string()
            .to_lowercase()
            .contains("urls don't look right")
    );
    assert!(moved.put_log().is_empty());
}

#[tokio::test]
async fn sandbox_runs_use_their_own_table() {
    let fx = Fixture::new(&["c00.mp3", "c01.mp3"]);

    let report = assign(&fx.project, &fx.template, &fx.ctx(config(), true))
        .await
        .unwrap();
    assert_eq!(report.submitted, 2);
    assert!(fx.market.tasks().iter().all(|t| t.options.sandbox));

    let production = fx.project.records(false).unwrap();
    assert!(production.iter().all(|r| r.is_unassigned()));
    assert!(production.iter().all(|r| r.status(Asset::Audio) == UploadStatus::No));

    let sandbox = fx.project.records(true).unwrap();
    assert!(sandbox.iter().all(|r| !r.is_unassigned()));
}

#[tokio::test]
async fn nothing_pending_is_an_error() {
    let fx = Fixture::new(&["c00.mp3"]);
    fx.run().await.unwrap();

    let err = fx.run().await.unwrap_err();
    assert!(matches!(err, ScribepoolError::Argument { .. }));
    assert!(err.to_string().contains("already assigned"));
    assert_eq!(fx.market.create_calls(), 1);
}

#[tokio::test]
async fn empty_project_is_an_error() {
    let fx = Fixture::new(&[]);
    let err = fx.run().await.unwrap_err();
    assert!(err.to_string().contains("No data"));
}

#[tokio::test]
async fn malformed_assignment_config_fails_before_upload() {
    let fx = Fixture::new(&["c00.mp3"]);
    let mut config = config();
    config
        .assignment
        .set_raw(scribepool::AssignmentField::Lifetime, "3z")
        .unwrap();

    let err = assign(&fx.project, &fx.template, &fx.ctx(config, false))
        .await
        .unwrap_err();
    assert!(matches!(err, ScribepoolError::Format { .. }));
    assert!(err.to_string().contains("can't convert '3z'"));
    assert!(fx.remote.put_log().is_empty());
}

#[tokio::test]
async fn missing_reward_fails_before_upload() {
    let fx = Fixture::new(&["c00.mp3"]);
    let err = assign(&fx.project, &fx.template, &fx.ctx(Config::default(), false))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("missing required config field"));
    assert!(fx.remote.put_log().is_empty());
}
