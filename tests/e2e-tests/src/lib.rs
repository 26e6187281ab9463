// E2E test harness for the lookout registry.
//
// These tests exercise the registry against a real etcd, so they are
// `#[ignore]`d by default. Point LOOKOUT_TEST_ETCD at a cluster (or run
// one locally on the default port) and run with `--ignored`.

use std::env;
use std::future::Future;
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

/// Initializes tracing output for test runs. Safe to call from every
/// test; only the first call installs the subscriber.
pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "lookout_registry=debug".into()),
            )
            .with_test_writer()
            .init();
    });
}

/// Store endpoints for the test cluster.
pub fn etcd_endpoints() -> Vec<String> {
    env::var("LOOKOUT_TEST_ETCD")
        .unwrap_or_else(|_| "http://localhost:2379".to_string())
        .split(',')
        .map(str::to_string)
        .collect()
}

/// Polls an async condition until it holds or the deadline passes.
pub async fn wait_for<F, Fut>(what: &str, deadline: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Timed out after {:?} waiting for: {}", deadline, what);
}

/// Prints the standard test banner.
pub fn banner(name: &str) {
    println!("\n========================================");
    println!("TEST: {}", name);
    println!("========================================\n");
}

/// Prints the standard pass footer.
pub fn passed(name: &str) {
    println!("\n========================================");
    println!("✓ TEST PASSED: {}", name);
    println!("========================================\n");
}
