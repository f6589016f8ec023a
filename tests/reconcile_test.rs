mod fixtures;
mod helpers;

use chrono::{Duration as ChronoDuration, Utc};
use helpers::*;
use std::time::Duration;
use tokio_test::assert_ok;

use transcode_dispatch::services::compute::{ManagedUnit, Reconciler};

const MAX_AGE: Duration = Duration::from_secs(2 * 60 * 60);

fn unit(name: &str, age_minutes: Option<i64>) -> ManagedUnit {
    ManagedUnit {
        name: name.to_string(),
        created_at: age_minutes.map(|m| Utc::now() - ChronoDuration::minutes(m)),
    }
}

#[tokio::test]
async fn test_sweep_deletes_only_units_past_max_age() {
    let harness = Harness::new();
    harness.platform.set_managed(vec![
        unit("transcoder-old", Some(180)),
        unit("transcoder-young", Some(10)),
        unit("transcoder-ancient", Some(60 * 24)),
    ]);
    let reconciler = Reconciler::new(harness.platform.clone(), MAX_AGE, Duration::from_secs(600));

    let report = assert_ok!(reconciler.sweep_once().await);

    assert_eq!(report.examined, 3);
    assert_eq!(report.deleted, vec!["transcoder-old", "transcoder-ancient"]);
    assert!(report.failed.is_empty());
    assert_eq!(
        harness.calls(),
        vec![
            Call::DeleteUnit("transcoder-old".to_string()),
            Call::DeleteUnit("transcoder-ancient".to_string()),
        ]
    );

    // Deleted units are gone from the next listing.
    let second = assert_ok!(reconciler.sweep_once().await);
    assert_eq!(second.examined, 1);
    assert!(second.deleted.is_empty());
}

#[tokio::test]
async fn test_sweep_skips_units_without_creation_time() {
    let harness = Harness::new();
    harness
        .platform
        .set_managed(vec![unit("transcoder-untagged", None)]);
    let reconciler = Reconciler::new(harness.platform.clone(), MAX_AGE, Duration::from_secs(600));

    let report = assert_ok!(reconciler.sweep_once().await);

    assert_eq!(report.examined, 1);
    assert!(report.deleted.is_empty());
    assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn test_sweep_reports_failed_deletes() {
    let harness = Harness::new();
    harness.platform.set_delete_fails(true);
    harness
        .platform
        .set_managed(vec![unit("transcoder-stuck", Some(300))]);
    let reconciler = Reconciler::new(harness.platform.clone(), MAX_AGE, Duration::from_secs(600));

    let report = assert_ok!(reconciler.sweep_once().await);

    assert!(report.deleted.is_empty());
    assert_eq!(report.failed, vec!["transcoder-stuck"]);
}

#[tokio::test]
async fn test_sweep_leaves_clock_skewed_units_alone() {
    let harness = Harness::new();
    harness
        .platform
        .set_managed(vec![unit("transcoder-future", Some(-30))]);
    let reconciler = Reconciler::new(harness.platform.clone(), MAX_AGE, Duration::from_secs(600));

    let report = assert_ok!(reconciler.sweep_once().await);

    assert!(report.deleted.is_empty());
}
