mod common;

use common::{TestDispatcher, wait_for, worker};
use core::time::Duration;
use qf_worker::{Op, Update, Worker, WorkerConfig};
use qf_worker_core::{ACK_BODY, DEFAULT_WORK_DELAY, Error};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SETTLE: Duration = Duration::from_secs(5);

fn watch<W: qf_worker::Watcher>(
    worker: &Worker<W>,
    scope: &CancellationToken,
) -> JoinHandle<qf_worker_core::Result<()>> {
    let worker = worker.clone();
    let scope = scope.clone();
    tokio::spawn(async move { worker.watch(scope).await })
}

async fn stop<W: qf_worker::Watcher>(
    worker: &Worker<W>,
    scope: &CancellationToken,
    discovery: JoinHandle<qf_worker_core::Result<()>>,
) {
    scope.cancel();
    tokio::time::timeout(SETTLE, worker.stopping())
        .await
        .expect("worker did not drain");
    assert_eq!(worker.live_sessions(), 0);
    discovery.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sessions_follow_endpoint_lifecycle() {
    let dispatcher = TestDispatcher::start().await;
    let (worker, updates) = worker(3);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates.send(vec![Update::add(dispatcher.addr())]).await.unwrap();
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 3).await);
    assert_eq!(worker.live_sessions(), 3);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(dispatcher.peak_streams(), 3);
    assert_eq!(dispatcher.total_streams(), 3);

    updates
        .send(vec![Update::delete(dispatcher.addr())])
        .await
        .unwrap();
    assert!(wait_for(SETTLE, || worker.live_sessions() == 0).await);
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 0).await);
    assert_eq!(dispatcher.peak_streams(), 3);

    stop(&worker, &scope, discovery).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn endpoint_can_be_added_again_after_removal() {
    let dispatcher = TestDispatcher::start().await;
    let (worker, updates) = worker(2);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates.send(vec![Update::add(dispatcher.addr())]).await.unwrap();
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 2).await);
    updates
        .send(vec![Update::delete(dispatcher.addr())])
        .await
        .unwrap();
    assert!(wait_for(SETTLE, || worker.live_sessions() == 0).await);

    updates.send(vec![Update::add(dispatcher.addr())]).await.unwrap();
    assert!(wait_for(SETTLE, || worker.live_sessions() == 2).await);
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 2).await);
    assert_eq!(dispatcher.total_streams(), 4);

    stop(&worker, &scope, discovery).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn removing_unknown_endpoint_is_harmless() {
    let (worker, updates) = worker(3);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates
        .send(vec![Update::delete("127.0.0.1:1")])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!discovery.is_finished());
    assert_eq!(worker.live_sessions(), 0);

    stop(&worker, &scope, discovery).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn work_takes_the_requested_delay() {
    let dispatcher = TestDispatcher::start().await;
    let (worker, updates) = worker(1);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates.send(vec![Update::add(dispatcher.addr())]).await.unwrap();
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 1).await);

    let completed = tokio::time::timeout(SETTLE, dispatcher.submit("250"))
        .await
        .unwrap()
        .unwrap();
    assert!(completed.result.is_ok());
    assert_eq!(&completed.result.body[..], ACK_BODY);
    assert!(
        completed.elapsed >= Duration::from_millis(250)
            && completed.elapsed < Duration::from_millis(750),
        "took {:?}",
        completed.elapsed
    );

    stop(&worker, &scope, discovery).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unparseable_body_takes_the_default_delay() {
    let dispatcher = TestDispatcher::start().await;
    let (worker, updates) = worker(1);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates.send(vec![Update::add(dispatcher.addr())]).await.unwrap();
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 1).await);

    for body in ["abc", ""] {
        let completed = tokio::time::timeout(SETTLE, dispatcher.submit(body))
            .await
            .unwrap()
            .unwrap();
        assert!(completed.result.is_ok(), "body {body:?}");
        assert!(
            completed.elapsed >= DEFAULT_WORK_DELAY
                && completed.elapsed < Duration::from_millis(600),
            "body {body:?} took {:?}",
            completed.elapsed
        );
    }

    stop(&worker, &scope, discovery).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn work_is_spread_over_sessions() {
    let dispatcher = TestDispatcher::start().await;
    let (worker, updates) = worker(4);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates.send(vec![Update::add(dispatcher.addr())]).await.unwrap();
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 4).await);

    // Four 300ms items on four sessions finish in about one delay.
    let start = tokio::time::Instant::now();
    let pending = (0..4).map(|_| dispatcher.submit("300"));
    let completed = tokio::time::timeout(SETTLE, futures::future::join_all(pending))
        .await
        .unwrap();
    for completed in completed {
        assert!(completed.unwrap().result.is_ok());
    }
    assert!(start.elapsed() < Duration::from_millis(1100));

    stop(&worker, &scope, discovery).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_drains_every_endpoint() {
    let first = TestDispatcher::start().await;
    let second = TestDispatcher::start().await;
    let (worker, updates) = worker(2);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates
        .send(vec![Update::add(first.addr()), Update::add(second.addr())])
        .await
        .unwrap();
    assert!(wait_for(SETTLE, || first.active_streams() == 2).await);
    assert!(wait_for(SETTLE, || second.active_streams() == 2).await);
    assert_eq!(worker.live_sessions(), 4);

    // A session is in the middle of a long item when the scope goes.
    let _long = first.submit("5000");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let start = tokio::time::Instant::now();
    stop(&worker, &scope, discovery).await;
    assert!(start.elapsed() < Duration::from_secs(2));

    assert!(wait_for(SETTLE, || first.active_streams() == 0).await);
    assert!(wait_for(SETTLE, || second.active_streams() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_endpoint_starts_no_sessions() {
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let (worker, updates) = worker(3);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates.send(vec![Update::add(dead.clone())]).await.unwrap();
    for _ in 0..20 {
        assert_eq!(worker.live_sessions(), 0);
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(!discovery.is_finished());

    // Still registered: a second add is ignored, a delete is accepted.
    updates.send(vec![Update::add(dead.clone())]).await.unwrap();
    updates.send(vec![Update::delete(dead)]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(worker.live_sessions(), 0);

    stop(&worker, &scope, discovery).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_add_does_not_start_a_second_group() {
    let dispatcher = TestDispatcher::start().await;
    let (worker, updates) = worker(3);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates.send(vec![Update::add(dispatcher.addr())]).await.unwrap();
    updates.send(vec![Update::add(dispatcher.addr())]).await.unwrap();
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 3).await);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(dispatcher.total_streams(), 3);
    assert_eq!(worker.live_sessions(), 3);

    stop(&worker, &scope, discovery).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sessions_reopen_closed_streams() {
    let dispatcher = TestDispatcher::start().await;
    let (worker, updates) = worker(2);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates.send(vec![Update::add(dispatcher.addr())]).await.unwrap();
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 2).await);

    dispatcher.close_streams();
    assert!(wait_for(SETTLE, || dispatcher.total_streams() >= 4).await);
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 2).await);
    assert_eq!(worker.live_sessions(), 2);

    let completed = tokio::time::timeout(SETTLE, dispatcher.submit("10"))
        .await
        .unwrap()
        .unwrap();
    assert!(completed.result.is_ok());

    stop(&worker, &scope, discovery).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refused_streams_are_retried() {
    let dispatcher = TestDispatcher::start().await;
    dispatcher.refuse_streams(true);
    let (worker, updates) = worker(2);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates.send(vec![Update::add(dispatcher.addr())]).await.unwrap();
    assert!(wait_for(SETTLE, || dispatcher.attempts() >= 6).await);
    assert_eq!(dispatcher.total_streams(), 0);
    assert_eq!(worker.live_sessions(), 2);

    dispatcher.refuse_streams(false);
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 2).await);

    stop(&worker, &scope, discovery).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bounded_retries_end_the_session() {
    let dispatcher = TestDispatcher::start().await;
    dispatcher.refuse_streams(true);

    let (watcher, updates) = qf_worker::ChannelWatcher::new(4);
    let mut config = WorkerConfig::new("scripted");
    config.parallelism = 2;
    config.backoff.min_backoff = Duration::from_millis(5);
    config.backoff.max_backoff = Duration::from_millis(20);
    config.backoff.max_retries = 3;
    let worker = Worker::with_watcher(config, watcher).unwrap();
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates.send(vec![Update::add(dispatcher.addr())]).await.unwrap();
    assert!(wait_for(SETTLE, || dispatcher.attempts() >= 2).await);
    assert!(wait_for(SETTLE, || worker.live_sessions() == 0).await);
    assert_eq!(dispatcher.attempts(), 6);
    assert!(!discovery.is_finished());

    stop(&worker, &scope, discovery).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_update_is_fatal_and_drains_sessions() {
    let dispatcher = TestDispatcher::start().await;
    let (worker, updates) = worker(2);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    updates.send(vec![Update::add(dispatcher.addr())]).await.unwrap();
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 2).await);

    updates
        .send(vec![Update {
            op: Op::Other(42),
            addr: "127.0.0.1:1".to_string(),
        }])
        .await
        .unwrap();
    let res = tokio::time::timeout(SETTLE, discovery)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(res, Err(Error::UnknownOp(42))));

    // The root scope is untouched, yet nothing outlives discovery.
    assert!(!scope.is_cancelled());
    tokio::time::timeout(SETTLE, worker.stopping())
        .await
        .expect("worker did not drain");
    assert_eq!(worker.live_sessions(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn closed_resolution_source_is_fatal() {
    let (worker, updates) = worker(2);
    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);

    drop(updates);
    let res = tokio::time::timeout(SETTLE, discovery)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(res, Err(Error::WatcherClosed)));
    assert!(!scope.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dns_worker_connects_to_ip_target() {
    let dispatcher = TestDispatcher::start().await;
    let mut config = WorkerConfig::new(dispatcher.addr());
    config.parallelism = 2;
    let worker = Worker::new(config).unwrap();
    assert!(worker.is_enabled());

    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);
    assert!(wait_for(SETTLE, || dispatcher.active_streams() == 2).await);
    assert_eq!(worker.live_sessions(), 2);

    stop(&worker, &scope, discovery).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disabled_worker_does_nothing() {
    let worker = Worker::new(WorkerConfig::default()).unwrap();
    assert!(!worker.is_enabled());

    let scope = CancellationToken::new();
    let discovery = watch(&worker, &scope);
    tokio::time::timeout(SETTLE, discovery)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    tokio::time::timeout(SETTLE, worker.stopping())
        .await
        .expect("disabled worker did not drain");
    assert_eq!(worker.live_sessions(), 0);
}
