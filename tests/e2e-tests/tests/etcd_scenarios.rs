//! End-to-end scenarios against a real etcd cluster.
//!
//! Each test opens its own registry handles and uses a unique service
//! name, so the tests can run in one process against a shared cluster
//! without stepping on each other.

use std::time::Duration;

use e2e_tests::{banner, etcd_endpoints, init_logging, passed, wait_for};
use lookout_common::{Error, ServiceName};
use lookout_registry::{Registry, LEASE_TTL_SECS};

fn unique_service(label: &str) -> ServiceName {
    ServiceName::from(format!("e2e-{}-{}", label, std::process::id()))
}

#[tokio::test]
#[ignore] // Needs a live etcd; run with --ignored
async fn test_register_and_resolve() {
    init_logging();
    banner("Register And Resolve");

    let service = unique_service("resolve");
    let server = Registry::connect("lookout", etcd_endpoints()).await.unwrap();
    let client = Registry::connect("lookout", etcd_endpoints()).await.unwrap();

    println!("Step 1: Registering {} at 127.0.0.1:9000...", service);
    server.register(&service, "127.0.0.1", 9000).await.unwrap();
    println!("✓ Registered as {:?}\n", server.self_conn_target());

    println!("Step 2: Resolving from a second process...");
    wait_for("endpoint to appear", Duration::from_secs(5), || async {
        client.resolve(&service).await.unwrap() == vec!["127.0.0.1:9000".to_string()]
    })
    .await;
    println!("✓ Resolved to 127.0.0.1:9000\n");

    println!("Step 3: Acquiring a channel...");
    let _channel = client.get_conn(&service).await.unwrap();
    println!("✓ Channel acquired (connections are lazy)\n");

    server.unregister().await.unwrap();
    server.close().await;
    client.close().await;
    passed("Register And Resolve");
}

#[tokio::test]
#[ignore] // Needs a live etcd; run with --ignored
async fn test_crashed_instance_expires() {
    init_logging();
    banner("Crashed Instance Expires");

    let service = unique_service("crash");
    let server = Registry::connect("lookout", etcd_endpoints()).await.unwrap();
    let client = Registry::connect("lookout", etcd_endpoints()).await.unwrap();

    println!("Step 1: Registering and confirming visibility...");
    server.register(&service, "127.0.0.1", 9001).await.unwrap();
    wait_for("endpoint to appear", Duration::from_secs(5), || async {
        !client.resolve(&service).await.unwrap().is_empty()
    })
    .await;
    println!("✓ Endpoint visible\n");

    println!("Step 2: Simulating a crash (close without unregister)...");
    server.close().await;

    println!("Step 3: Waiting for the lease to expire...");
    wait_for(
        "endpoint to expire",
        Duration::from_secs(LEASE_TTL_SECS as u64 + 5),
        || async { client.resolve(&service).await.unwrap().is_empty() },
    )
    .await;
    println!("✓ Endpoint gone within the lease TTL\n");

    client.close().await;
    passed("Crashed Instance Expires");
}

#[tokio::test]
#[ignore] // Needs a live etcd; run with --ignored
async fn test_unregister_removes_immediately() {
    init_logging();
    banner("Unregister Removes Immediately");

    let service = unique_service("unreg");
    let server = Registry::connect("lookout", etcd_endpoints()).await.unwrap();
    let client = Registry::connect("lookout", etcd_endpoints()).await.unwrap();

    server.register(&service, "127.0.0.1", 9002).await.unwrap();
    wait_for("endpoint to appear", Duration::from_secs(5), || async {
        !client.resolve(&service).await.unwrap().is_empty()
    })
    .await;

    println!("Step: Unregistering and timing removal...");
    let before = tokio::time::Instant::now();
    server.unregister().await.unwrap();
    wait_for("endpoint to vanish", Duration::from_secs(2), || async {
        client.resolve(&service).await.unwrap().is_empty()
    })
    .await;
    let took = before.elapsed();
    println!("✓ Removed in {:?}, well under the {}s TTL\n", took, LEASE_TTL_SECS);
    assert!(took < Duration::from_secs(LEASE_TTL_SECS as u64));

    server.close().await;
    client.close().await;
    passed("Unregister Removes Immediately");
}

#[tokio::test]
#[ignore] // Needs a live etcd; run with --ignored
async fn test_resolve_unknown_service_fails_fast() {
    init_logging();
    banner("Resolve Unknown Service Fails Fast");

    let service = unique_service("unknown");
    let client = Registry::connect("lookout", etcd_endpoints()).await.unwrap();

    println!("Step: Dialing a service nobody registered...");
    let before = tokio::time::Instant::now();
    let result = client.get_conn(&service).await;
    let took = before.elapsed();

    assert!(matches!(result, Err(Error::DialFailed { .. })));
    // Fails fast instead of blocking until an instance appears.
    assert!(took < Duration::from_secs(2));
    println!("✓ DialFailed returned in {:?}\n", took);

    client.close().await;
    passed("Resolve Unknown Service Fails Fast");
}

#[tokio::test]
#[ignore] // Needs a live etcd; run with --ignored
async fn test_two_instances_fan_out() {
    init_logging();
    banner("Two Instances Fan Out");

    let service = unique_service("fanout");
    let a = Registry::connect("lookout", etcd_endpoints()).await.unwrap();
    let b = Registry::connect("lookout", etcd_endpoints()).await.unwrap();
    let client = Registry::connect("lookout", etcd_endpoints()).await.unwrap();

    println!("Step 1: Registering two instances...");
    a.register(&service, "127.0.0.1", 9003).await.unwrap();
    b.register(&service, "127.0.0.1", 9004).await.unwrap();
    wait_for("both endpoints to appear", Duration::from_secs(5), || async {
        client.resolve(&service).await.unwrap().len() == 2
    })
    .await;
    println!("✓ Both visible\n");

    println!("Step 2: Fan-out connections...");
    let conns = client.get_conns(&service).await.unwrap();
    assert_eq!(conns.len(), 2);
    println!("✓ Got {} channels\n", conns.len());

    a.unregister().await.unwrap();
    println!("Step 3: One instance leaves; resolver follows...");
    wait_for("set to shrink to one", Duration::from_secs(5), || async {
        client.resolve(&service).await.unwrap() == vec!["127.0.0.1:9004".to_string()]
    })
    .await;
    println!("✓ Set converged to the surviving instance\n");

    b.unregister().await.unwrap();
    a.close().await;
    b.close().await;
    client.close().await;
    passed("Two Instances Fan Out");
}
