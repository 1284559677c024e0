//! Tests for the accept loop.

use std::{
    io,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio::{
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::{Duration, Instant, advance, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{AcceptLoopOptions, BackoffConfig, MockAcceptListener, accept_loop};

#[tokio::test]
async fn accept_loop_stops_on_shutdown() {
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let listener = Arc::new(
        TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener"),
    );

    tracker.spawn(accept_loop(
        listener,
        |_, _| {},
        |_| {},
        AcceptLoopOptions {
            shutdown: token.clone(),
            backoff: BackoffConfig::default(),
        },
    ));

    token.cancel();
    tracker.close();
    let result = timeout(Duration::from_millis(100), tracker.wait()).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn accepted_streams_reach_the_callback() {
    let token = CancellationToken::new();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let accepted = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&accepted);

    let handle = tokio::spawn(accept_loop(
        Arc::new(listener),
        move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
        },
        |_| {},
        AcceptLoopOptions {
            shutdown: token.clone(),
            backoff: BackoffConfig::default(),
        },
    ));

    let _a = TcpStream::connect(addr).await.expect("connect");
    let _b = TcpStream::connect(addr).await.expect("connect");
    timeout(Duration::from_secs(1), async {
        while accepted.load(Ordering::SeqCst) < 2 {
            yield_now().await;
        }
    })
    .await
    .expect("both connections accepted");

    token.cancel();
    handle.await.expect("accept loop join");
}

/// A listener whose every accept fails, recording when it was called.
fn failing_listener(calls: &Arc<Mutex<Vec<Instant>>>, num_calls: usize) -> MockAcceptListener {
    let mut listener = MockAcceptListener::new();
    let call_log = Arc::clone(calls);
    listener
        .expect_accept()
        .returning(move || {
            let call_log = Arc::clone(&call_log);
            Box::pin(async move {
                call_log.lock().expect("lock").push(Instant::now());
                Err(io::Error::other("mock error"))
            })
        })
        .times(num_calls);
    listener
        .expect_local_addr()
        .returning(|| Ok("127.0.0.1:0".parse().expect("addr parse")))
        .times(num_calls);
    listener
}

fn intervals(calls: &[Instant]) -> Vec<Duration> {
    calls
        .windows(2)
        .filter_map(|pair| match pair {
            [a, b] => b.checked_duration_since(*a),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn accept_errors_back_off_exponentially() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let listener = Arc::new(failing_listener(&calls, 4));
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let errors = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&errors);

    tracker.spawn(accept_loop(
        listener,
        |_, _| {},
        move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        },
        AcceptLoopOptions {
            shutdown: token.clone(),
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
        },
    ));

    yield_now().await;
    assert_eq!(calls.lock().expect("lock").len(), 1);

    for ms in [5, 10, 20] {
        advance(Duration::from_millis(ms)).await;
        yield_now().await;
    }

    token.cancel();
    tracker.close();
    tracker.wait().await;

    let calls = calls.lock().expect("lock");
    assert_eq!(calls.len(), 4);
    assert_eq!(
        intervals(&calls),
        [5, 10, 20].map(Duration::from_millis).to_vec()
    );
    assert_eq!(errors.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_back_off_sleep() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let listener = Arc::new(failing_listener(&calls, 1));
    let token = CancellationToken::new();

    let handle = tokio::spawn(accept_loop(
        listener,
        |_, _| {},
        |_| {},
        AcceptLoopOptions {
            shutdown: token.clone(),
            backoff: BackoffConfig {
                initial_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(60),
            },
        },
    ));
    yield_now().await;
    token.cancel();

    let started = Instant::now();
    handle.await.expect("accept loop join");
    assert!(started.elapsed() < Duration::from_secs(60));
}
