//! Leader-to-worker dispatch tests.
//!
//! Exercise `PushJob` against real worker servers and stub executors that
//! reject or stall.


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cron_lite::config::{DispatchConfig, EngineConfig};
use cron_lite::dispatch::{Dispatcher, ACCEPTED};
use cron_lite::error::CronError;
use cron_lite::proto::executor_server::{Executor, ExecutorServer};
use cron_lite::proto::{PushJobRequest, PushJobResponse};
use cron_lite::worker::JobEngine;
use test_harness::{add_counting_job, wait_for_count, TestWorker};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// Executor that answers every push with a fixed code, optionally after a delay
struct StubExecutor {
    code: i32,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

#[tonic::async_trait]
impl Executor for StubExecutor {
    async fn push_job(
        &self,
        _request: Request<PushJobRequest>,
    ) -> Result<Response<PushJobResponse>, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(Response::new(PushJobResponse {
            code: self.code,
            message: format!("stub {}", self.code),
        }))
    }
}

async fn spawn_stub(code: i32, delay: Duration) -> (String, Arc<AtomicUsize>, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let calls = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();

    let stub = StubExecutor {
        code,
        delay,
        calls: calls.clone(),
    };
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        Server::builder()
            .add_service(ExecutorServer::new(stub))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await
            })
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, calls, cancel)
}

/// A listener that never accepts, with its backlog filled so further
/// connects stall in the handshake. Keep the returned streams alive.
async fn stalled_listener() -> (TcpListener, Vec<TcpStream>, String) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(0).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut fillers = Vec::new();
    for _ in 0..4 {
        match tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => fillers.push(stream),
            _ => break,
        }
    }
    (listener, fillers, addr.to_string())
}

fn fast_dispatch() -> DispatchConfig {
    DispatchConfig {
        call_timeout_ms: 300,
        connect_timeout_ms: 300,
        ..DispatchConfig::default()
    }
}

/// Test 1: A successful push runs the job on the worker
#[tokio::test]
async fn test_dispatch_runs_job_on_worker() {
    let engine = JobEngine::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let job_id = add_counting_job(&engine, "backup", counter.clone()).await;
    let worker = TestWorker::start(engine).await;

    let dispatcher = Dispatcher::new(&fast_dispatch());
    dispatcher
        .dispatch(&CancellationToken::new(), &worker.addr, &job_id, "backup")
        .await
        .expect("dispatch should be accepted");

    assert!(wait_for_count(&counter, 1, Duration::from_secs(2)).await);

    dispatcher.close().await;
    worker.shutdown().await;
}

/// Test 2: Acceptance means "handed to the queue", so a worker whose queue is
/// full still answers success and the trigger is silently dropped
#[tokio::test]
async fn test_full_worker_queue_still_accepts() {
    let engine = JobEngine::new(&EngineConfig { queue_capacity: 1 });
    let counter = Arc::new(AtomicUsize::new(0));
    let job_id = add_counting_job(&engine, "bounded", counter.clone()).await;
    let worker = TestWorker::start_paused(engine.clone()).await;

    let dispatcher = Dispatcher::new(&fast_dispatch());
    let cancel = CancellationToken::new();
    for _ in 0..3 {
        dispatcher
            .dispatch(&cancel, &worker.addr, &job_id, "bounded")
            .await
            .expect("worker should accept even when its queue is full");
    }

    assert_eq!(engine.queued(), 1);
    assert_eq!(engine.dropped_triggers(), 2);
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    dispatcher.close().await;
    worker.shutdown().await;
}

/// Test 3: Unknown job names are accepted by the worker too
#[tokio::test]
async fn test_unknown_job_is_accepted() {
    let worker = TestWorker::start(JobEngine::default()).await;
    let dispatcher = Dispatcher::new(&fast_dispatch());

    dispatcher
        .dispatch(&CancellationToken::new(), &worker.addr, "job-ghost", "ghost")
        .await
        .unwrap();

    dispatcher.close().await;
    worker.shutdown().await;
}

/// Test 4: An unreachable worker is a connection error
#[tokio::test]
async fn test_unreachable_worker_errors() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let dispatcher = Dispatcher::new(&fast_dispatch());
    let err = dispatcher
        .dispatch(&CancellationToken::new(), &addr, "job-a", "a")
        .await
        .unwrap_err();
    assert!(matches!(err, CronError::Connection(_)), "got {:?}", err);
    assert!(dispatcher.pool().is_empty().await);
}

/// Test 5: A non-200 reply is surfaced with the worker's code and message
#[tokio::test]
async fn test_rejected_dispatch() {
    let (addr, calls, cancel) = spawn_stub(500, Duration::ZERO).await;
    let dispatcher = Dispatcher::new(&fast_dispatch());

    let err = dispatcher
        .dispatch(&CancellationToken::new(), &addr, "job-a", "a")
        .await
        .unwrap_err();
    match err {
        CronError::DispatchRejected {
            worker,
            code,
            message,
        } => {
            assert_eq!(worker, addr);
            assert_eq!(code, 500);
            assert_eq!(message, "stub 500");
        }
        other => panic!("expected DispatchRejected, got {:?}", other),
    }
    // Not retried
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    dispatcher.close().await;
    cancel.cancel();
}

/// Test 6: A worker slower than the call timeout fails the dispatch
#[tokio::test]
async fn test_slow_worker_times_out() {
    let (addr, _calls, cancel) = spawn_stub(ACCEPTED, Duration::from_secs(5)).await;
    let dispatcher = Dispatcher::new(&fast_dispatch());

    let started = tokio::time::Instant::now();
    let err = dispatcher
        .dispatch(&CancellationToken::new(), &addr, "job-a", "a")
        .await
        .unwrap_err();
    assert!(matches!(err, CronError::DispatchTimeout { .. }), "got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(2));

    dispatcher.close().await;
    cancel.cancel();
}

/// Test 7: Cancelling the caller's token aborts an in-flight call
#[tokio::test]
async fn test_cancel_aborts_in_flight_dispatch() {
    let (addr, _calls, stub_cancel) = spawn_stub(ACCEPTED, Duration::from_secs(5)).await;
    let dispatcher = Arc::new(Dispatcher::new(&DispatchConfig::default()));
    let cancel = CancellationToken::new();

    let task = {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        let addr = addr.clone();
        tokio::spawn(async move { dispatcher.dispatch(&cancel, &addr, "job-a", "a").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("cancelled dispatch should return promptly")
        .unwrap();
    assert!(matches!(result, Err(CronError::Cancelled)));

    stub_cancel.cancel();
}

/// Test 8: Repeated dispatches to one worker share a pooled connection
#[tokio::test]
async fn test_pool_reuses_worker_connection() {
    let engine = JobEngine::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let job_id = add_counting_job(&engine, "reuse", counter.clone()).await;
    let worker = TestWorker::start(engine).await;

    let dispatcher = Dispatcher::new(&fast_dispatch());
    let cancel = CancellationToken::new();
    for _ in 0..4 {
        dispatcher
            .dispatch(&cancel, &worker.addr, &job_id, "reuse")
            .await
            .unwrap();
    }
    assert_eq!(dispatcher.pool().len().await, 1);
    assert!(wait_for_count(&counter, 4, Duration::from_secs(2)).await);

    dispatcher.close().await;
    assert!(dispatcher.pool().is_empty().await);
    worker.shutdown().await;
}

/// Test 9: A worker stuck in its handshake delays neither dispatches to
/// other workers nor other dispatches to itself
#[tokio::test]
async fn test_stalled_worker_does_not_block_others() {
    let engine = JobEngine::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let job_id = add_counting_job(&engine, "healthy", counter.clone()).await;
    let worker = TestWorker::start(engine).await;
    let (_listener, _fillers, stalled_addr) = stalled_listener().await;

    let dispatcher = Arc::new(Dispatcher::new(&DispatchConfig {
        call_timeout_ms: 1000,
        connect_timeout_ms: 5000,
        ..DispatchConfig::default()
    }));
    let cancel = CancellationToken::new();
    dispatcher
        .dispatch(&cancel, &worker.addr, &job_id, "healthy")
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let mut stalled = Vec::new();
    for _ in 0..3 {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        let addr = stalled_addr.clone();
        stalled.push(tokio::spawn(async move {
            dispatcher.dispatch(&cancel, &addr, "job-a", "a").await
        }));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let healthy_started = tokio::time::Instant::now();
    dispatcher
        .dispatch(&cancel, &worker.addr, &job_id, "healthy")
        .await
        .unwrap();
    assert!(
        healthy_started.elapsed() < Duration::from_millis(500),
        "healthy dispatch took {:?}",
        healthy_started.elapsed()
    );

    for task in stalled {
        let err = task.await.unwrap().unwrap_err();
        assert!(
            matches!(err, CronError::DispatchTimeout { .. } | CronError::Connection(_)),
            "got {:?}",
            err
        );
    }
    // Bounded by the call timeout and not serialized behind each other
    assert!(
        started.elapsed() < Duration::from_millis(1800),
        "stalled dispatches took {:?}",
        started.elapsed()
    );
    assert!(wait_for_count(&counter, 2, Duration::from_secs(2)).await);

    dispatcher.close().await;
    worker.shutdown().await;
}
