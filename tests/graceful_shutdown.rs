//! End-to-end shutdown behavior against a real socket and a mock upstream.

use std::time::{Duration, Instant};

use effective_cloudrun::lifecycle::{
    DrainOutcome, Service, ShutdownError, ShutdownState, StartupError, SyntheticSignal,
    TerminationSignal,
};
use effective_cloudrun::net::ListenerError;

mod common;

const UNIT: Duration = Duration::from_secs(1);

#[tokio::test]
async fn test_clean_drain_when_idle() {
    let upstream = common::start_delay_backend(UNIT).await;
    let service = Service::bind(&common::test_config(upstream, 5, 5)).await.unwrap();
    let addr = service.local_addr();
    let mut state = service.state();

    let (trigger, signal) = SyntheticSignal::new();
    let run = tokio::spawn(service.run(signal));

    let client = common::client();
    let res = client.get(format!("http://{addr}/")).send().await.expect("Service unreachable");
    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "<h1>hello world!</h1>");

    let res = client
        .get(format!("http://{addr}/healthz"))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "abc-123");

    trigger.fire(TerminationSignal::Terminate);
    let result = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("Drain should finish at once with no traffic")
        .unwrap();

    assert!(result.is_ok(), "{result:?}");
    assert_eq!(DrainOutcome::from_result(&result), DrainOutcome::Clean);
    assert_eq!(*state.borrow_and_update(), ShutdownState::Stopped);
}

#[tokio::test]
async fn test_in_flight_requests_finish_before_deadline() {
    // Each request takes 2 s upstream; the drain deadline is 5 s.
    let upstream = common::start_delay_backend(UNIT).await;
    let service = Service::bind(&common::test_config(upstream, 2, 5)).await.unwrap();
    let addr = service.local_addr();
    let mut state = service.state();

    let (trigger, signal) = SyntheticSignal::new();
    let run = tokio::spawn(service.run(signal));

    let requests: Vec<_> = (0..3)
        .map(|_| {
            tokio::spawn(async move {
                common::client()
                    .get(format!("http://{addr}/noncancelablerequest"))
                    .send()
                    .await
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let started = Instant::now();
    trigger.fire(TerminationSignal::Terminate);

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("Drain should finish before the deadline")
        .unwrap();
    let elapsed = started.elapsed();

    assert!(result.is_ok(), "{result:?}");
    assert!(elapsed < Duration::from_secs(5), "Drain hit the deadline: {elapsed:?}");
    assert_eq!(*state.borrow_and_update(), ShutdownState::Stopped);

    for request in requests {
        let res = request.await.unwrap().expect("In-flight request should complete");
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.unwrap(), "<h1>hello world</h1>");
    }
}

#[tokio::test]
async fn test_scoped_request_aborted_by_signal() {
    let upstream = common::start_delay_backend(UNIT).await;
    let service = Service::bind(&common::test_config(upstream, 5, 5)).await.unwrap();
    let addr = service.local_addr();

    let (trigger, signal) = SyntheticSignal::new();
    let run = tokio::spawn(service.run(signal));

    let request = tokio::spawn(async move {
        common::client()
            .get(format!("http://{addr}/cancelablerequest"))
            .send()
            .await
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    trigger.fire(TerminationSignal::Interrupt);

    let res = request.await.unwrap().expect("Aborted request should still get a response");
    assert_eq!(res.status(), 503);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Service Unavailable");

    let result = run.await.unwrap();
    assert!(result.is_ok(), "{result:?}");
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "Drain waited for the upstream: {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_unscoped_request_forces_timeout() {
    let upstream = common::start_delay_backend(UNIT).await;
    let service = Service::bind(&common::test_config(upstream, 5, 1)).await.unwrap();
    let addr = service.local_addr();
    let mut state = service.state();

    let (trigger, signal) = SyntheticSignal::new();
    let run = tokio::spawn(service.run(signal));

    let request = tokio::spawn(async move {
        common::client()
            .get(format!("http://{addr}/noncancelablerequest"))
            .send()
            .await
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    trigger.fire(TerminationSignal::Terminate);

    let result = run.await.unwrap();
    let elapsed = started.elapsed();

    assert!(
        matches!(result, Err(ShutdownError::DrainTimedOut { .. })),
        "{result:?}"
    );
    assert!(elapsed >= Duration::from_secs(1), "Deadline cut short: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "Deadline not enforced: {elapsed:?}");

    let outcome = DrainOutcome::from_result(&result);
    assert_eq!(outcome, DrainOutcome::TimedOut);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(*state.borrow_and_update(), ShutdownState::TimedOut);

    // Force-closed before the upstream answered.
    assert!(request.await.unwrap().is_err());
}

#[tokio::test]
async fn test_no_new_connections_after_stop() {
    let upstream = common::start_delay_backend(UNIT).await;
    let service = Service::bind(&common::test_config(upstream, 5, 2)).await.unwrap();
    let addr = service.local_addr();
    let mut state = service.state();

    let (trigger, signal) = SyntheticSignal::new();
    let run = tokio::spawn(service.run(signal));

    // Keeps the drain open.
    let _request = tokio::spawn(async move {
        common::client()
            .get(format!("http://{addr}/noncancelablerequest"))
            .send()
            .await
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    trigger.fire(TerminationSignal::Terminate);
    state
        .wait_for(|s| *s == ShutdownState::Draining)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(
        tokio::net::TcpStream::connect(addr).await.is_err(),
        "Listener still accepting during drain"
    );

    let _ = run.await.unwrap();
}

#[tokio::test]
async fn test_bind_conflict_is_fatal() {
    let upstream = common::start_delay_backend(UNIT).await;
    let first = Service::bind(&common::test_config(upstream, 5, 5)).await.unwrap();

    let mut config = common::test_config(upstream, 5, 5);
    config.listener.port = first.local_addr().port();

    let result = Service::bind(&config).await;
    assert!(matches!(
        result,
        Err(StartupError::Listener(ListenerError::Bind { .. }))
    ));
}
