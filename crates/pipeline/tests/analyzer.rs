use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scanbay_pipeline::{
    Analyzer, ArtifactStore, PipelineError, ProcessError, ProcessOutput, ProcessRequest,
    ProcessRunner, StagingArea, parse_artifact_name,
};

fn temp_root(label: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let suffix = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "scanbay_{}_{}_{}",
        label,
        std::process::id(),
        suffix
    ))
}

#[derive(Default)]
struct FakeRunner {
    exit_code: i32,
    stderr: String,
    write_output: bool,
    time_out: bool,
    seen: Mutex<Vec<ProcessRequest>>,
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ProcessError> {
        if self.time_out {
            return Err(ProcessError::TimedOut {
                after: request.deadline,
            });
        }

        if self.write_output {
            let output_path = PathBuf::from(request.args.last().expect("output arg expected"));
            std::fs::write(&output_path, b"jpeg-bytes").expect("output write should succeed");
        }

        self.seen.lock().unwrap().push(request);

        Ok(ProcessOutput {
            exit_code: self.exit_code,
            stdout: String::new(),
            stderr: self.stderr.clone(),
        })
    }
}

struct Fixture {
    staging: StagingArea,
    script: PathBuf,
    artifact_root: PathBuf,
}

async fn fixture() -> Fixture {
    let root = temp_root("analyzer");
    tokio::fs::create_dir_all(&root).await.unwrap();

    let script = root.join("analyze.py");
    tokio::fs::write(&script, b"# stand-in analyzer\n")
        .await
        .unwrap();

    Fixture {
        staging: StagingArea::new(root.join("uploads")),
        script,
        artifact_root: root.join("artifacts"),
    }
}

fn analyzer_with(fx: &Fixture, runner: Arc<dyn ProcessRunner>) -> Analyzer {
    Analyzer::new(
        "python3",
        &fx.script,
        ArtifactStore::new(&fx.artifact_root),
        runner,
        Duration::from_secs(5),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn successful_analysis_produces_artifact_and_consumes_input() {
    let fx = fixture().await;
    let runner = Arc::new(FakeRunner {
        write_output: true,
        ..FakeRunner::default()
    });
    let analyzer = analyzer_with(&fx, runner.clone());

    let staged = fx.staging.stage("scan.png", b"pixels").await.unwrap();
    let entry = analyzer
        .analyze(&staged.path)
        .await
        .expect("analysis should succeed");

    assert!(parse_artifact_name(&entry.file_name).is_some());
    let artifact = fx.artifact_root.join(&entry.file_name);
    let bytes = tokio::fs::read(&artifact).await.unwrap();
    assert!(!bytes.is_empty(), "artifact must be a non-empty file");

    assert!(
        !tokio::fs::try_exists(&staged.path).await.unwrap(),
        "staged input must be deleted after success"
    );

    // The runner was handed exactly <script> <input> <output>.
    let seen = runner.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].args.len(), 3);
    assert_eq!(seen[0].args[0].as_os_str(), fx.script.as_os_str());
    assert_eq!(seen[0].args[1].as_os_str(), staged.path.as_os_str());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nonzero_exit_is_a_processing_error_and_input_is_retained() {
    let fx = fixture().await;
    let analyzer = analyzer_with(
        &fx,
        Arc::new(FakeRunner {
            exit_code: 2,
            stderr: "cannot read input image\n".to_string(),
            ..FakeRunner::default()
        }),
    );

    let staged = fx.staging.stage("scan.png", b"pixels").await.unwrap();
    let err = analyzer.analyze(&staged.path).await.unwrap_err();

    match err {
        PipelineError::Processing { detail, .. } => {
            let detail = detail.expect("diagnostic detail expected");
            assert!(detail.contains("cannot read input image"));
        }
        other => panic!("expected processing error, got {:?}", other),
    }

    assert!(
        tokio::fs::try_exists(&staged.path).await.unwrap(),
        "staged input must be retained on failure"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_exit_without_output_file_is_a_processing_error() {
    let fx = fixture().await;
    let analyzer = analyzer_with(&fx, Arc::new(FakeRunner::default()));

    let staged = fx.staging.stage("scan.png", b"pixels").await.unwrap();
    let err = analyzer.analyze(&staged.path).await.unwrap_err();

    assert!(matches!(err, PipelineError::Processing { .. }));
    assert!(
        tokio::fs::try_exists(&staged.path).await.unwrap(),
        "staged input must be retained on failure"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deadline_expiry_is_a_timeout_error() {
    let fx = fixture().await;
    let analyzer = analyzer_with(
        &fx,
        Arc::new(FakeRunner {
            time_out: true,
            ..FakeRunner::default()
        }),
    );

    let staged = fx.staging.stage("scan.png", b"pixels").await.unwrap();
    let err = analyzer.analyze(&staged.path).await.unwrap_err();
    assert!(matches!(err, PipelineError::Timeout { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_script_fails_fast_without_spawning() {
    let fx = fixture().await;
    let runner = Arc::new(FakeRunner {
        write_output: true,
        ..FakeRunner::default()
    });
    let analyzer = Analyzer::new(
        "python3",
        fx.script.with_file_name("not-there.py"),
        ArtifactStore::new(&fx.artifact_root),
        runner.clone(),
        Duration::from_secs(5),
    );

    let staged = fx.staging.stage("scan.png", b"pixels").await.unwrap();
    let err = analyzer.analyze(&staged.path).await.unwrap_err();

    assert!(matches!(err, PipelineError::Configuration(_)));
    assert!(
        runner.seen.lock().unwrap().is_empty(),
        "no subprocess may be spawned when the script is missing"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_input_fails_fast_without_spawning() {
    let fx = fixture().await;
    let runner = Arc::new(FakeRunner::default());
    let analyzer = analyzer_with(&fx, runner.clone());

    let err = analyzer
        .analyze(&fx.artifact_root.join("never-staged.png"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Configuration(_)));
    assert!(runner.seen.lock().unwrap().is_empty());
}
