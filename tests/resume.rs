//! End-to-end resume behaviour through the public API.

use async_trait::async_trait;
use labelrun::models::{DatasetConfig, RawClassification, ServiceError};
use labelrun::{
    AccuracyReport, BatchRunner, CategorySet, CheckpointStore, ClassificationService, Config,
    Dataset, RunnerSettings, StopReason,
};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Keyword classifier that fails the first call for selected texts.
struct KeywordService {
    flaky: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl KeywordService {
    fn new(flaky: &[&str]) -> Self {
        Self {
            flaky: Mutex::new(flaky.iter().map(|s| s.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClassificationService for KeywordService {
    async fn classify(&self, text: &str) -> Result<RawClassification, ServiceError> {
        self.calls.lock().unwrap().push(text.to_string());
        if self.flaky.lock().unwrap().remove(text) {
            return Err(ServiceError::Api {
                status: 503,
                message: "upstream overloaded".to_string(),
            });
        }

        let payload = if text.contains("worried") {
            "Anxiety: 0.81\nDepression: 0.12\nNormal: 0.07"
        } else if text.contains("hopeless") {
            "Anxiety: 0.10\nDepression: 0.85\nNormal: 0.05"
        } else {
            "Anxiety: 0.05\nDepression: 0.05\nNormal: 0.90"
        };
        Ok(RawClassification::new(payload))
    }
}

const DATASET: &str = "\
statement,status
I am worried about tomorrow,Anxiety
nice walk in the park,Normal
everything feels hopeless,Depression
worried sick about exams,Anxiety
had lunch with friends,Normal
hopeless and tired,Anxiety
";

fn write_dataset(dir: &Path) -> DatasetConfig {
    let path = dir.join("statements.csv");
    fs::write(&path, DATASET).unwrap();
    DatasetConfig {
        path,
        text_column: "statement".to_string(),
        label_column: Some("status".to_string()),
        index_column: None,
    }
}

fn build_runner(
    service: Arc<KeywordService>,
    dir: &Path,
    settings: RunnerSettings,
) -> BatchRunner {
    let dataset = Dataset::load(&write_dataset(dir)).unwrap();
    BatchRunner::new(
        service,
        CheckpointStore::new(dir.join("out").join("results.csv")),
        dataset,
        CategorySet::new(["Anxiety", "Depression", "Normal"]),
        settings,
    )
}

#[tokio::test]
async fn test_interrupted_run_resumes_without_duplicates() {
    let temp_dir = TempDir::new().unwrap();
    let service = Arc::new(KeywordService::new(&["nice walk in the park"]));

    let first = RunnerSettings {
        target_count: 6,
        batch_size: 3,
        max_cycles: Some(1),
        ..Default::default()
    };
    let summary = build_runner(service.clone(), temp_dir.path(), first)
        .run()
        .await
        .unwrap();
    assert_eq!(summary.stop_reason, Some(StopReason::CycleLimit));
    assert_eq!(summary.final_size, 2);

    let second = RunnerSettings {
        target_count: 6,
        batch_size: 3,
        ..Default::default()
    };
    let summary = build_runner(service.clone(), temp_dir.path(), second)
        .run()
        .await
        .unwrap();
    assert_eq!(summary.stop_reason, Some(StopReason::TargetReached));
    assert_eq!(summary.resumed_from, 2);
    assert_eq!(summary.final_size, 6);

    let calls = service.calls();
    let park = calls.iter().filter(|c| *c == "nice walk in the park").count();
    assert_eq!(park, 2);
    assert_eq!(calls.len(), 7);

    let store = CheckpointStore::new(temp_dir.path().join("out").join("results.csv"));
    let state = store.load().unwrap();
    let orders: Vec<_> = state.results().iter().map(|r| r.order).collect();
    // The retried record lands after the rows persisted before it
    assert_eq!(orders, [1, 3, 2, 4, 5, 6]);

    let report = AccuracyReport::from_state(&state);
    assert_eq!(report.compared, 6);
    assert_eq!(report.matched, 5);
}

#[tokio::test]
async fn test_checkpoint_file_layout() {
    let temp_dir = TempDir::new().unwrap();
    let service = Arc::new(KeywordService::new(&[]));
    let settings = RunnerSettings {
        target_count: 2,
        batch_size: 10,
        ..Default::default()
    };
    build_runner(service, temp_dir.path(), settings)
        .run()
        .await
        .unwrap();

    let content = fs::read_to_string(temp_dir.path().join("out").join("results.csv")).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("order,text,Condition,Value,Flg"));
    assert_eq!(
        lines.next(),
        Some("1,I am worried about tomorrow,Anxiety,0.81,Anxiety")
    );
    assert_eq!(lines.next(), Some("2,nice walk in the park,Normal,0.9,Normal"));
    assert_eq!(lines.next(), None);
}

#[test]
fn test_config_drives_runner_settings() {
    let config = Config::from_toml(
        r#"
[classification]
system_prompt = "prompts/classify.md"
categories = ["Anxiety", "Normal"]
parse_failure = "retry"

[dataset]
path = "data.csv"

[checkpoint]
path = "results.csv"

[runner]
target_count = 50
batch_size = 5
max_attempts = 0
"#,
    )
    .unwrap();

    let settings = RunnerSettings::from_config(&config);
    assert_eq!(settings.target_count, 50);
    assert_eq!(settings.batch_size, 5);
    assert_eq!(settings.attempt_limit, None);
    assert_eq!(
        settings.parse_failure,
        labelrun::models::ParseFailurePolicy::Retry
    );
}
