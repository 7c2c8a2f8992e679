//! Report history pruning across disk, registry and exported series

mod common;

use batch_job_controller::{resolve_latest, ExecutionRegistry, MetricResult, Phase, Results};
use common::{init_tracing, TestJob};
use filetime::FileTime;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn age(root: &Path, id: &str, secs: u64) {
    let mtime = SystemTime::now() - Duration::from_secs(secs);
    filetime::set_file_mtime(root.join(id), FileTime::from_system_time(mtime)).unwrap();
}

fn registry_with_gauge(dir: &TempDir, history: usize) -> Arc<ExecutionRegistry> {
    let config = common::config(dir, 2, history)
        .latest_metrics_label(true)
        .gauge("packages", "outdated packages", &["package"])
        .build()
        .unwrap();
    ExecutionRegistry::from_config(config).unwrap()
}

#[tokio::test]
async fn test_pruned_execution_disappears_everywhere() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let registry = registry_with_gauge(&dir, 1);

    let old = registry.new_execution(1);
    age(dir.path(), &old, 300);
    let job = Arc::new(TestJob::hanging(&registry, &old, "node-a"));
    registry.add_pod(job).await.unwrap();
    assert!(registry.all_added(&old).unwrap().pruned.is_empty());

    let results: Results = HashMap::from([(
        "packages".to_string(),
        vec![MetricResult::new(3.0).with_label("package", "openssl")],
    )]);
    registry.report_received(&old, "node-a", None, &results);
    registry.pod_terminated(&old, "node-a", Phase::Succeeded).unwrap();

    let old_label = format!(r#"executionID="{old}""#);
    let text = registry.collector().encode_text().unwrap();
    assert!(text.contains(&old_label));

    let current = registry.new_execution(0);
    age(dir.path(), &current, 100);
    let outcome = registry.all_added(&current).unwrap();
    assert_eq!(outcome.pruned, vec![old.clone()]);

    // disk
    assert!(!dir.path().join(&old).exists());
    assert!(dir.path().join(&current).exists());
    assert!(std::fs::read_dir(dir.path()).unwrap().count() <= 2);
    assert_eq!(resolve_latest(dir.path()), Some(current.clone()));

    // registry
    assert_eq!(registry.execution_ids(), vec![current.clone()]);
    assert!(!registry.has("node-a", &old));
    assert!(registry.pod_record(&old, "node-a").is_none());

    // metrics
    let text = registry.collector().encode_text().unwrap();
    assert!(!text.contains(&old_label));
    assert!(text.contains(r#"executionID="latest""#));
    assert!(text.contains(r#"node_check_packages{executionID="latest",node="node-a",package="openssl"} 3"#));

    // stale signals stay harmless
    let err = registry
        .pod_terminated(&old, "node-a", Phase::Failed)
        .unwrap_err();
    assert!(err.is_not_found());
    registry.report_received(&old, "node-a", None, &results);
    let text = registry.collector().encode_text().unwrap();
    assert!(!text.contains(&old_label));
}

#[tokio::test]
async fn test_history_window_is_bounded() {
    let dir = TempDir::new().unwrap();
    let registry = registry_with_gauge(&dir, 2);

    let mut ids = Vec::new();
    for i in 0..6u64 {
        let id = registry.new_execution(0);
        age(dir.path(), &id, 1000 - i * 100);
        registry.all_added(&id).unwrap();
        ids.push(id);

        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert!(entries <= 3, "{entries} entries after execution {i}");
    }

    // the two newest by mtime survive, the latest marker takes the third slot
    let survivors: Vec<String> = ids[4..].to_vec();
    assert_eq!(registry.execution_ids(), survivors);
    for id in &ids[..4] {
        assert!(!dir.path().join(id).exists(), "{id} should be pruned");
    }
    assert_eq!(resolve_latest(dir.path()), ids.last().cloned());
}

#[tokio::test]
async fn test_foreign_entries_count_towards_history() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("lost+found")).unwrap();
    age(dir.path(), "lost+found", 5000);
    let registry = registry_with_gauge(&dir, 1);

    let id = registry.new_execution(0);
    let outcome = registry.all_added(&id).unwrap();
    assert_eq!(outcome.entries_before, 3);
    assert_eq!(outcome.pruned, vec!["lost+found".to_string()]);
    assert_eq!(registry.execution_ids(), vec![id]);
}
