//! An in-process dispatcher for driving a real worker.
//!
//! Work submitted through [`TestDispatcher::submit`] goes to a shared queue;
//! whichever open stream is idle first hands it out and reports the worker's
//! answer, with the time it took, on the returned channel.

#![allow(dead_code)]

use bytes::Bytes;
use core::time::Duration;
use qf_worker::{ChannelWatcher, Update, Worker, WorkerConfig};
use qf_worker_core::proto::{
    WorkItem, WorkResult,
    dispatcher_server::{Dispatcher, DispatcherServer},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming, transport::Server};

/// A worker answer as seen by the dispatcher.
#[derive(Debug)]
pub struct Completed {
    pub result: WorkResult,
    /// From handing out the item to receiving its result.
    pub elapsed: Duration,
}

struct Job {
    item: WorkItem,
    done: oneshot::Sender<Completed>,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicUsize,
    active: AtomicUsize,
    total: AtomicUsize,
    peak: AtomicUsize,
    refuse: AtomicBool,
}

struct ActiveStream(Arc<Counters>);

impl ActiveStream {
    fn enter(counters: Arc<Counters>) -> Self {
        counters.total.fetch_add(1, Ordering::SeqCst);
        let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(active, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct DispatchService {
    jobs: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    counters: Arc<Counters>,
    epoch: watch::Sender<u64>,
}

#[tonic::async_trait]
impl Dispatcher for DispatchService {
    type ProcessStream = ReceiverStream<Result<WorkItem, Status>>;

    async fn process(
        &self,
        request: Request<Streaming<WorkResult>>,
    ) -> Result<Response<Self::ProcessStream>, Status> {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);
        if self.counters.refuse.load(Ordering::SeqCst) {
            return Err(Status::unavailable("not accepting workers"));
        }

        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(1);
        let active = ActiveStream::enter(Arc::clone(&self.counters));
        let jobs = Arc::clone(&self.jobs);
        let mut epoch = self.epoch.subscribe();
        epoch.borrow_and_update();

        tokio::spawn(async move {
            let _active = active;
            loop {
                let job = tokio::select! {
                    () = tx.closed() => return,
                    _ = epoch.changed() => return,
                    job = async { jobs.lock().await.recv().await } => match job {
                        Some(job) => job,
                        None => return,
                    },
                };

                let sent_at = Instant::now();
                if tx.send(Ok(job.item)).await.is_err() {
                    return;
                }

                let result = tokio::select! {
                    _ = epoch.changed() => return,
                    msg = inbound.message() => msg,
                };
                match result {
                    Ok(Some(result)) => {
                        let _ = job.done.send(Completed {
                            result,
                            elapsed: sent_at.elapsed(),
                        });
                    }
                    _ => return,
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

pub struct TestDispatcher {
    addr: String,
    jobs: mpsc::UnboundedSender<Job>,
    counters: Arc<Counters>,
    epoch: watch::Sender<u64>,
    shutdown: CancellationToken,
}

impl TestDispatcher {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (jobs, queue) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let (epoch, _) = watch::channel(0);
        let shutdown = CancellationToken::new();

        let service = DispatchService {
            jobs: Arc::new(Mutex::new(queue)),
            counters: Arc::clone(&counters),
            epoch: epoch.clone(),
        };

        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                Server::builder()
                    .add_service(DispatcherServer::new(service))
                    .serve_with_incoming_shutdown(
                        TcpListenerStream::new(listener),
                        shutdown.cancelled_owned(),
                    )
                    .await
                    .unwrap();
            }
        });

        Self {
            addr,
            jobs,
            counters,
            epoch,
            shutdown,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.clone()
    }

    /// Queues one work item carrying `body`.
    pub fn submit(&self, body: impl Into<Bytes>) -> oneshot::Receiver<Completed> {
        let (done, completed) = oneshot::channel();
        let item = WorkItem { body: body.into() };
        self.jobs.send(Job { item, done }).unwrap();
        completed
    }

    /// Ends every open stream from the dispatcher side.
    pub fn close_streams(&self) {
        self.epoch.send_modify(|epoch| *epoch += 1);
    }

    /// Rejects (or accepts again) new streams with `UNAVAILABLE`.
    pub fn refuse_streams(&self, refuse: bool) {
        self.counters.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Streams currently open.
    pub fn active_streams(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Streams ever accepted.
    pub fn total_streams(&self) -> usize {
        self.counters.total.load(Ordering::SeqCst)
    }

    /// Most streams ever open at the same time.
    pub fn peak_streams(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Stream opens received, refused ones included.
    pub fn attempts(&self) -> usize {
        self.counters.attempts.load(Ordering::SeqCst)
    }
}

impl Drop for TestDispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A worker fed by a scripted watcher, with fast backoff.
pub fn worker(parallelism: usize) -> (Worker<ChannelWatcher>, mpsc::Sender<Vec<Update>>) {
    let (watcher, updates) = ChannelWatcher::new(16);
    let mut config = WorkerConfig::new("scripted");
    config.parallelism = parallelism;
    config.backoff.min_backoff = Duration::from_millis(10);
    config.backoff.max_backoff = Duration::from_millis(100);
    (Worker::with_watcher(config, watcher).unwrap(), updates)
}

/// Polls `cond` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
