use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use stagehand::{
    from_fn, Config, DevelopOptions, Observer, Operation, Orchestrator, RunMode, Stage,
    StagehandError, TaskConstraints, TaskContext, TaskOutput, TaskResult,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Operation that logs its start and end, yielding in between so that
/// siblings get a chance to interleave
fn recorded(name: &str, log: &Log) -> Arc<dyn Operation> {
    let name = name.to_string();
    let log = Arc::clone(log);
    from_fn(move |_| {
        let name = name.clone();
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(format!("start:{}", name));
            tokio::time::sleep(Duration::from_millis(10)).await;
            log.lock().unwrap().push(format!("end:{}", name));
            Ok(TaskOutput::default())
        }
    })
}

fn failing(command: &str) -> Arc<dyn Operation> {
    let command = command.to_string();
    from_fn(move |_| {
        let command = command.clone();
        async move {
            Err(StagehandError::CommandFailed {
                command,
                code: 1,
                stderr: Some("Error: expected \"}\"".to_string()),
            })
        }
    })
}

fn counting(counter: &Arc<AtomicUsize>) -> Arc<dyn Operation> {
    let counter = Arc::clone(counter);
    from_fn(move |_| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutput::default())
        }
    })
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn position(log: &[String], entry: &str) -> usize {
    log.iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{} missing from {:?}", entry, log))
}

#[derive(Default)]
struct RecordingObserver {
    stages: Mutex<Vec<usize>>,
    finished: Mutex<Vec<String>>,
    failures: AtomicUsize,
}

impl Observer for RecordingObserver {
    fn stage_started(&self, index: usize, _stage: &Stage) {
        self.stages.lock().unwrap().push(index);
    }

    fn task_finished(&self, result: &TaskResult) {
        self.finished.lock().unwrap().push(result.name.clone());
    }

    fn pipeline_failed(&self, _error: &StagehandError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn stages_run_strictly_in_order() {
    let log: Log = Arc::default();
    let observer = Arc::new(RecordingObserver::default());
    let mut orch = Orchestrator::new(TaskContext::new("/site")).with_observer(observer.clone());

    for name in ["clean:dist", "copy:files", "pug", "sass:app", "svg"] {
        orch.register_task(name, recorded(name, &log), TaskConstraints::default())
            .unwrap();
    }

    let stages = vec![
        Stage::Task("clean:dist".to_string()),
        Stage::Parallel(names(&["copy:files", "pug", "sass:app"])),
        Stage::Task("svg".to_string()),
    ];
    let report = orch.run_sequence(&stages).await.unwrap();

    let log = log.lock().unwrap().clone();
    assert_eq!(log.len(), 10);
    assert_eq!(report.results.len(), 5);
    assert_eq!(report.stages_run, 3);

    let clean_end = position(&log, "end:clean:dist");
    for member in ["copy:files", "pug", "sass:app"] {
        assert!(position(&log, &format!("start:{}", member)) > clean_end);
        assert!(position(&log, &format!("end:{}", member)) < position(&log, "start:svg"));
    }

    // Parallel members all started before any of them finished
    let first_end = ["copy:files", "pug", "sass:app"]
        .iter()
        .map(|m| position(&log, &format!("end:{}", m)))
        .min()
        .unwrap();
    let last_start = ["copy:files", "pug", "sass:app"]
        .iter()
        .map(|m| position(&log, &format!("start:{}", m)))
        .max()
        .unwrap();
    assert!(last_start < first_end);

    assert_eq!(*observer.stages.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(observer.finished.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn nothing_starts_after_a_failed_stage() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut orch = Orchestrator::new(TaskContext::new("/site"));
    orch.register_task("clean:dist", counting(&counter), TaskConstraints::default())
        .unwrap();
    orch.register_task("sass:app", failing("sass"), TaskConstraints::default())
        .unwrap();
    orch.register_task("pug", counting(&counter), TaskConstraints::default())
        .unwrap();
    orch.register_task("svg", counting(&counter), TaskConstraints::default())
        .unwrap();
    orch.register_task("copy:fonts", counting(&counter), TaskConstraints::default())
        .unwrap();

    let stages = vec![
        Stage::Task("clean:dist".to_string()),
        Stage::Parallel(names(&["sass:app", "pug"])),
        Stage::Parallel(names(&["svg", "copy:fonts"])),
    ];
    let err = orch.run_sequence(&stages).await.unwrap_err();

    assert_eq!(err.task(), Some("sass:app"));
    match &err {
        StagehandError::TaskExecution { source, .. } => {
            assert!(matches!(**source, StagehandError::CommandFailed { code: 1, .. }));
        }
        other => panic!("expected a task failure, got {:?}", other),
    }
    // clean:dist and the pug sibling ran; the third stage never did
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn duplicate_registration_keeps_the_first_operation() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let mut orch = Orchestrator::new(TaskContext::new("/site"));

    orch.register_task("pug", counting(&first), TaskConstraints::default())
        .unwrap();
    let err = orch
        .register_task("pug", counting(&second), TaskConstraints::default())
        .unwrap_err();
    assert!(matches!(err, StagehandError::DuplicateTask { .. }));

    orch.run_sequence(&[Stage::Task("pug".to_string())]).await.unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[test]
fn watch_rule_fires_for_matching_paths_only() {
    let mut orch = Orchestrator::new(TaskContext::new("/site"));
    orch.register_task("sass:app", counting(&Arc::default()), TaskConstraints::default())
        .unwrap();
    orch.watch(&["src/sass/**/*.scss"], &["sass:app"]).unwrap();

    let triggers = orch.triggers_for(&[PathBuf::from("/site/src/sass/app.scss")]);
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].tasks, vec!["sass:app"]);

    let triggers = orch.triggers_for(&[PathBuf::from("/site/src/js/app.js")]);
    assert!(triggers.is_empty());

    // Several matching paths in one batch still fire the rule once
    let triggers = orch.triggers_for(&[
        PathBuf::from("src/sass/app.scss"),
        PathBuf::from("src/sass/base/_grid.scss"),
    ]);
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].paths.len(), 2);
}

#[test]
fn watch_rejects_bad_patterns_and_unknown_tasks() {
    let mut orch = Orchestrator::new(TaskContext::new("/site"));
    orch.register_task("pug", counting(&Arc::default()), TaskConstraints::default())
        .unwrap();

    let err = orch.watch(&["src/pug/{a,b"], &["pug"]).unwrap_err();
    assert!(matches!(err, StagehandError::InvalidPattern { .. }));

    let err = orch.watch(&["src/pug/*.pug"], &["pug", "svg"]).unwrap_err();
    assert!(matches!(err, StagehandError::TaskNotFound { name, .. } if name == "svg"));
    assert!(orch.watch_rules().is_empty());
}

fn set_mtime(path: &Path, time: SystemTime) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(time).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn incremental_render_only_rewrites_stale_pages() {
    let temp = tempfile::tempdir().unwrap();
    let pug = temp.path().join("src/pug");
    fs::create_dir_all(&pug).unwrap();
    fs::write(pug.join("index.pug"), "index").unwrap();
    fs::write(pug.join("about.pug"), "about").unwrap();
    fs::write(pug.join("_layout.pug"), "layout").unwrap();

    let past = SystemTime::now() - Duration::from_secs(60);
    for name in ["index.pug", "about.pug", "_layout.pug"] {
        set_mtime(&pug.join(name), past);
    }

    let config = Config::parse(
        r#"
        [tasks."pug:changed"]
        kind = "render"
        src = ["src/pug/*.pug"]
        dest = "dist"
        command = "cat {input}"
        only_changed = true
        "#,
        &temp.path().join("stagehand.toml"),
    )
    .unwrap();
    let orch = Orchestrator::from_config(&config, TaskContext::new(temp.path())).unwrap();
    let stages = vec![Stage::Task("pug:changed".to_string())];

    let written = |report: &stagehand::SequenceReport| {
        report.results[0].output.as_ref().unwrap().written.clone()
    };

    let first = orch.run_sequence(&stages).await.unwrap();
    assert_eq!(written(&first).len(), 2);
    assert!(!temp.path().join("dist/_layout.html").exists());

    let second = orch.run_sequence(&stages).await.unwrap();
    assert!(written(&second).is_empty());
    assert_eq!(second.results[0].output.as_ref().unwrap().skipped, 2);

    fs::write(pug.join("about.pug"), "about us").unwrap();
    set_mtime(&pug.join("about.pug"), SystemTime::now() + Duration::from_secs(60));

    let third = orch.run_sequence(&stages).await.unwrap();
    assert_eq!(written(&third), vec![temp.path().join("dist/about.html")]);
    assert_eq!(
        fs::read_to_string(temp.path().join("dist/about.html")).unwrap(),
        "about us"
    );
}

#[tokio::test]
async fn develop_session_survives_failing_tasks() {
    let rebuilt = Arc::new(AtomicUsize::new(0));
    let observer = Arc::new(RecordingObserver::default());
    let mut orch = Orchestrator::new(TaskContext::new("/site")).with_observer(observer.clone());

    orch.register_task("sass:app", failing("sass"), TaskConstraints::default())
        .unwrap();
    orch.register_task("pug", counting(&rebuilt), TaskConstraints::default())
        .unwrap();
    orch.watch(&["src/sass/**/*.scss"], &["sass:app"]).unwrap();
    orch.watch(&["src/pug/**/*.pug"], &["pug"]).unwrap();

    let mut handle = Arc::new(orch)
        .run_develop(DevelopOptions::default())
        .await
        .unwrap();
    assert!(handle.server_addr().is_none());

    handle.inject(["src/sass/app.scss"]).await.unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(10), handle.wait_for_runs(1))
        .await
        .unwrap();
    assert_eq!(stats.failed, 1);
    assert!(handle.is_alive());
    assert_eq!(observer.failures.load(Ordering::SeqCst), 1);

    handle.inject(["src/pug/index.pug"]).await.unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(10), handle.wait_for_runs(2))
        .await
        .unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.triggered, 2);
    assert_eq!(rebuilt.load(Ordering::SeqCst), 1);
    assert!(handle.is_alive());

    handle.shutdown().await;
}

#[tokio::test]
async fn develop_halts_only_for_halting_tasks() {
    let after_lint = Arc::new(AtomicUsize::new(0));
    let after_style = Arc::new(AtomicUsize::new(0));
    let mut orch = Orchestrator::new(TaskContext::new("/site"));

    orch.register_task("js:app", failing("eslint"), TaskConstraints::default().halting())
        .unwrap();
    orch.register_task("sass:app", failing("sass"), TaskConstraints::default())
        .unwrap();
    orch.register_task("reload:js", counting(&after_lint), TaskConstraints::default())
        .unwrap();
    orch.register_task("reload:css", counting(&after_style), TaskConstraints::default())
        .unwrap();

    let js = vec![Stage::Task("js:app".to_string()), Stage::Task("reload:js".to_string())];
    let err = orch.run_pipeline(&js, RunMode::Develop).await.unwrap_err();
    assert_eq!(err.task(), Some("js:app"));
    assert_eq!(after_lint.load(Ordering::SeqCst), 0);

    let css = vec![Stage::Task("sass:app".to_string()), Stage::Task("reload:css".to_string())];
    let report = orch.run_pipeline(&css, RunMode::Develop).await.unwrap();
    assert_eq!(report.reported.len(), 1);
    assert_eq!(after_style.load(Ordering::SeqCst), 1);

    // The same failure halts a one-shot build
    let err = orch.run_pipeline(&css, RunMode::BuildOnce).await.unwrap_err();
    assert_eq!(err.task(), Some("sass:app"));
    assert_eq!(after_style.load(Ordering::SeqCst), 1);
}

#[test]
fn layered_build_plan() {
    let config = Config::parse(stagehand::config::STARTER_CONFIG, Path::new("stagehand.toml")).unwrap();
    let orch = Orchestrator::from_config(&config, TaskContext::new("/site")).unwrap();

    let plan = orch.plan(&["pug", "sass:app", "js:app"]).unwrap();
    assert_eq!(
        plan,
        vec![
            Stage::Task("clean:dist".to_string()),
            Stage::Parallel(names(&["js:app", "pug", "sass:app"])),
        ]
    );
    assert_eq!(orch.watch_rules().len(), 9);
}
