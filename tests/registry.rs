// ABOUTME: Integration tests for the tunnel registry and per-tunnel supervisor.
// ABOUTME: Drives start/stop/list and the retry state machine with scripted connectors.

mod support;

use std::sync::Arc;
use std::time::Duration;
use support::{FakeTransport, ScriptedConnector, Step};
use tunwarden::config::ForwardSpec;
use tunwarden::tunnel::{TunnelError, TunnelRegistry, TunnelState, TunnelStatus};
use tunwarden::types::{Endpoint, TunnelId};

use TunnelState::*;

fn registry(connector: Arc<ScriptedConnector>) -> TunnelRegistry {
    TunnelRegistry::new(connector, support::fast_settings())
}

async fn local_spec() -> ForwardSpec {
    let port = support::free_port().await;
    ForwardSpec::local(
        Endpoint::new("127.0.0.1", port),
        Endpoint::new("127.0.0.1", 9),
    )
}

#[tokio::test]
async fn start_then_list_returns_the_spec() {
    support::init_tracing();
    let registry = registry(ScriptedConnector::new([Step::Hang]));
    let spec = ForwardSpec::local(
        Endpoint::new("127.0.0.1", 8080),
        Endpoint::new("127.0.0.1", 80),
    );

    registry
        .start(TunnelId::new("web"), support::target("prod"), spec.clone())
        .unwrap();

    let listed = registry.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id.as_str(), "web");
    assert_eq!(listed[0].spec, spec);
    assert_eq!(listed[0].server.as_str(), "prod");

    registry.stop_all().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn duplicate_start_is_rejected() {
    support::init_tracing();
    let registry = registry(ScriptedConnector::new([Step::Hang, Step::Hang]));
    let spec = local_spec().await;

    registry
        .start(TunnelId::new("db"), support::target("prod"), spec.clone())
        .unwrap();
    let err = registry
        .start(TunnelId::new("db"), support::target("prod"), spec)
        .err().unwrap();

    assert!(matches!(err, TunnelError::AlreadyRunning(ref id) if id.as_str() == "db"));
    assert_eq!(registry.len(), 1);
    registry.stop_all().await;
}

#[tokio::test]
async fn stopping_unknown_tunnel_fails() {
    let registry = registry(ScriptedConnector::new([]));
    let err = registry.stop(&TunnelId::new("ghost")).await.unwrap_err();
    assert!(matches!(err, TunnelError::NotRunning(_)));
    assert_eq!(registry.status(&TunnelId::new("ghost")), TunnelStatus::Stopped);
}

#[tokio::test]
async fn stop_all_is_idempotent() {
    support::init_tracing();
    let registry = registry(ScriptedConnector::new([Step::Hang]));
    registry.stop_all().await;

    registry
        .start(TunnelId::new("a"), support::target("prod"), local_spec().await)
        .unwrap();
    registry.stop_all().await;
    registry.stop_all().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn exhausting_retries_fails_and_deregisters() {
    support::init_tracing();
    let connector = ScriptedConnector::new([
        Step::Fail(support::refused()),
        Step::Fail(support::refused()),
        Step::Fail(support::refused()),
    ]);
    let registry = registry(connector.clone());

    let tunnel = registry
        .start(TunnelId::new("flaky"), support::target("prod"), local_spec().await)
        .unwrap();
    let terminal = tokio::time::timeout(Duration::from_secs(5), tunnel.wait())
        .await
        .unwrap();

    assert_eq!(terminal, Failed);
    assert_eq!(
        tunnel.history(),
        vec![Idle, Connecting, Retrying, Connecting, Retrying, Connecting, Retrying, Failed]
    );
    assert_eq!(connector.attempts(), 3);
    assert_eq!(tunnel.retry_count(), 3);
    assert!(!registry.is_active(tunnel.id()));
}

#[tokio::test]
async fn stop_during_backoff_goes_straight_to_stopped() {
    support::init_tracing();
    let connector = ScriptedConnector::new([Step::Fail(support::refused())]);
    let mut settings = support::fast_settings();
    settings.retry_unit = Duration::from_secs(30);
    let registry = TunnelRegistry::new(connector.clone(), settings);

    let tunnel = registry
        .start(TunnelId::new("slow"), support::target("prod"), local_spec().await)
        .unwrap();
    support::eventually(|| tunnel.state() == Retrying).await;

    registry.stop(tunnel.id()).await.unwrap();

    assert_eq!(tunnel.state(), Stopped);
    assert_eq!(tunnel.history(), vec![Idle, Connecting, Retrying, Stopped]);
    assert_eq!(connector.attempts(), 1);
    assert!(!registry.is_active(tunnel.id()));
}

#[tokio::test]
async fn rejected_credentials_fail_without_retrying() {
    support::init_tracing();
    let connector = ScriptedConnector::new([Step::Fail(support::rejected())]);
    let registry = registry(connector.clone());

    let tunnel = registry
        .start(TunnelId::new("locked"), support::target("prod"), local_spec().await)
        .unwrap();
    let terminal = tunnel.wait().await;

    assert_eq!(terminal, Failed);
    assert_eq!(tunnel.history(), vec![Idle, Connecting, Failed]);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn successful_connect_resets_retry_count() {
    support::init_tracing();
    let transport = FakeTransport::new();
    let connector = ScriptedConnector::new([
        Step::Fail(support::refused()),
        Step::Connect(transport.clone()),
    ]);
    let registry = registry(connector);

    let tunnel = registry
        .start(TunnelId::new("reset"), support::target("prod"), local_spec().await)
        .unwrap();
    support::eventually(|| tunnel.state() == Forwarding).await;

    assert_eq!(tunnel.retry_count(), 0);
    assert_eq!(
        tunnel.history(),
        vec![Idle, Connecting, Retrying, Connecting, Forwarding]
    );
    registry.stop(tunnel.id()).await.unwrap();
    assert_eq!(transport.close_calls(), 1);
}

#[tokio::test]
async fn stop_while_forwarding_closes_transport() {
    support::init_tracing();
    let transport = FakeTransport::new();
    let registry = registry(ScriptedConnector::new([Step::Connect(transport.clone())]));

    let tunnel = registry
        .start(TunnelId::new("live"), support::target("prod"), local_spec().await)
        .unwrap();
    support::eventually(|| tunnel.state() == Forwarding).await;
    assert_eq!(registry.status(tunnel.id()), TunnelStatus::Running);

    registry.stop(tunnel.id()).await.unwrap();

    assert_eq!(tunnel.state(), Stopped);
    assert_eq!(transport.close_calls(), 1);
    assert_eq!(registry.status(tunnel.id()), TunnelStatus::Stopped);
}

#[tokio::test]
async fn lost_transport_triggers_reconnect() {
    support::init_tracing();
    let first = FakeTransport::new();
    let second = FakeTransport::new();
    let connector = ScriptedConnector::new([
        Step::Connect(first.clone()),
        Step::Connect(second.clone()),
    ]);
    let registry = registry(connector.clone());

    let tunnel = registry
        .start(TunnelId::new("drop"), support::target("prod"), local_spec().await)
        .unwrap();
    support::eventually(|| tunnel.state() == Forwarding).await;

    first.kill();
    support::eventually(|| connector.attempts() == 2 && tunnel.state() == Forwarding).await;

    assert_eq!(
        tunnel.history(),
        vec![Idle, Connecting, Forwarding, Retrying, Connecting, Forwarding]
    );
    assert_eq!(first.close_calls(), 1);
    registry.stop_all().await;
    assert_eq!(second.close_calls(), 1);
}

#[tokio::test]
async fn failed_probe_triggers_reconnect() {
    support::init_tracing();
    let first = FakeTransport::new();
    let connector = ScriptedConnector::new([
        Step::Connect(first.clone()),
        Step::Connect(FakeTransport::new()),
    ]);
    let mut settings = support::fast_settings();
    settings.keepalive_interval = Duration::from_millis(30);
    settings.accept_tick = Duration::from_secs(60);
    let registry = TunnelRegistry::new(connector.clone(), settings);

    let tunnel = registry
        .start(TunnelId::new("probe"), support::target("prod"), local_spec().await)
        .unwrap();
    support::eventually(|| tunnel.state() == Forwarding).await;

    first.fail_probes();
    support::eventually(|| connector.attempts() == 2 && tunnel.state() == Forwarding).await;

    assert_eq!(first.close_calls(), 1);
    assert!(tunnel.history().contains(&Retrying));
    registry.stop_all().await;
}

#[tokio::test]
async fn occupied_local_port_is_fatal() {
    support::init_tracing();
    let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = holder.local_addr().unwrap().port();
    let transport = FakeTransport::new();
    let registry = registry(ScriptedConnector::new([Step::Connect(transport.clone())]));

    let spec = ForwardSpec::local(
        Endpoint::new("127.0.0.1", port),
        Endpoint::new("127.0.0.1", 9),
    );
    let tunnel = registry
        .start(TunnelId::new("busy"), support::target("prod"), spec)
        .unwrap();

    assert_eq!(tunnel.wait().await, Failed);
    assert_eq!(tunnel.history(), vec![Idle, Connecting, Forwarding, Failed]);
    assert_eq!(transport.close_calls(), 1);
    drop(holder);
}

#[tokio::test]
async fn restart_after_stop_uses_a_new_instance() {
    support::init_tracing();
    let registry = registry(ScriptedConnector::new([Step::Hang, Step::Hang]));
    let spec = local_spec().await;

    let first = registry
        .start(TunnelId::new("again"), support::target("prod"), spec.clone())
        .unwrap();
    registry.stop(first.id()).await.unwrap();

    let second = registry
        .start(TunnelId::new("again"), support::target("prod"), spec)
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
    registry.stop_all().await;
}

#[tokio::test]
async fn stop_gives_up_waiting_after_grace_and_marks_stopped() {
    support::init_tracing();
    let transport = FakeTransport::new();
    transport.hang_on_close();
    let mut settings = support::fast_settings();
    settings.stop_grace = Duration::from_millis(200);
    let registry = TunnelRegistry::new(
        ScriptedConnector::new([Step::Connect(transport.clone())]),
        settings,
    );

    let tunnel = registry
        .start(TunnelId::new("stuck"), support::target("prod"), local_spec().await)
        .unwrap();
    support::eventually(|| tunnel.state() == Forwarding).await;

    let waiter = {
        let tunnel = Arc::clone(&tunnel);
        tokio::spawn(async move { tunnel.wait().await })
    };

    let started = tokio::time::Instant::now();
    tokio::time::timeout(Duration::from_secs(2), registry.stop(tunnel.id()))
        .await
        .expect("stop returns once the grace period is over")
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));

    assert!(!registry.is_active(tunnel.id()));
    assert_eq!(tunnel.state(), Stopped);
    let woken = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiters are released by a forced stop")
        .unwrap();
    assert_eq!(woken, Stopped);
    assert_eq!(transport.close_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_starts_for_one_id_admit_exactly_one() {
    support::init_tracing();
    const RACERS: usize = 16;
    let registry = registry(ScriptedConnector::new((0..RACERS).map(|_| Step::Hang)));
    let spec = local_spec().await;
    let barrier = Arc::new(tokio::sync::Barrier::new(RACERS));

    let starts = (0..RACERS).map(|_| {
        let registry = registry.clone();
        let spec = spec.clone();
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            let listed = registry.list();
            assert!(listed.len() <= 1, "listing saw {} entries", listed.len());
            registry
                .start(TunnelId::new("shared"), support::target("prod"), spec)
                .map(|_| ())
        })
    });
    let results: Vec<_> = futures::future::join_all(starts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, TunnelError::AlreadyRunning(_)))
    );
    assert_eq!(registry.len(), 1);

    let tunnel = registry.get(&TunnelId::new("shared")).unwrap();
    let stops = (0..RACERS).map(|_| {
        let registry = registry.clone();
        tokio::spawn(async move { registry.stop(&TunnelId::new("shared")).await })
    });
    let stopped: Vec<_> = futures::future::join_all(stops)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert!(stopped.iter().any(|r| r.is_ok()));
    assert!(
        stopped
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, TunnelError::NotRunning(_)))
    );
    assert!(registry.is_empty());
    assert_eq!(tunnel.state(), Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_and_stops_keep_the_table_consistent() {
    support::init_tracing();
    const TUNNELS: usize = 12;
    let registry = registry(ScriptedConnector::new((0..TUNNELS).map(|_| Step::Hang)));
    let mut specs = Vec::with_capacity(TUNNELS);
    for _ in 0..TUNNELS {
        specs.push(local_spec().await);
    }

    let starts = specs.into_iter().enumerate().map(|(i, spec)| {
        let registry = registry.clone();
        tokio::spawn(async move {
            let id = TunnelId::new(format!("t{i:02}"));
            let tunnel = registry.start(id, support::target("prod"), spec).unwrap();
            let _ = registry.list();
            tunnel
        })
    });
    let tunnels: Vec<_> = futures::future::join_all(starts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let listed: Vec<String> = registry
        .list()
        .into_iter()
        .map(|s| s.id.as_str().to_string())
        .collect();
    let expected: Vec<String> = (0..TUNNELS).map(|i| format!("t{i:02}")).collect();
    assert_eq!(listed, expected);

    let stops = tunnels.iter().map(|tunnel| {
        let registry = registry.clone();
        let id = tunnel.id().clone();
        tokio::spawn(async move {
            let _ = registry.stop(&id).await;
        })
    });
    let sweep = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.stop_all().await })
    };
    for joined in futures::future::join_all(stops).await {
        joined.unwrap();
    }
    sweep.await.unwrap();

    assert!(registry.is_empty());
    assert!(registry.list().is_empty());
    for tunnel in &tunnels {
        assert_eq!(tunnel.state(), Stopped);
    }
}
