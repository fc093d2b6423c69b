//! Load-generation engine: a fixed pool of workers replaying one request
//! until a shared deadline, funnelling records to a single collector.

use futures::FutureExt;
use reqwest::{Client, Request};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::Result;
use crate::handler::{CapturedResponse, ResponseHandler};
use crate::record::{AttemptError, Record};
use crate::report::Report;

/// Upper bound used when `now + duration` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Run a GET load test against `target` with a default client
pub async fn http_get(num_thread: usize, duration: Duration, target: &str) -> Result<Report> {
    let client = Client::new();
    let request = client.get(target).build()?;
    let mut typhoon = Typhoon::new(num_thread, duration, client, request);
    Ok(typhoon.start().await)
}

/// Cloneable handle that ends the current run of a [`Typhoon`] early.
///
/// Stopping is single-slot and non-blocking: while a signal is pending,
/// further calls are coalesced. Safe to call before, during or after a run.
#[derive(Debug, Clone)]
pub struct StopHandle {
    signal: Arc<Notify>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.signal.notify_one();
    }
}

/// HTTP load-generation engine
pub struct Typhoon {
    stop: Arc<Notify>,
    num_thread: usize,
    duration: Duration,
    client: Client,
    request: Request,
    handler: Option<Arc<dyn ResponseHandler>>,
}

impl Typhoon {
    /// Create an engine; a zero thread count is raised to one
    pub fn new(num_thread: usize, duration: Duration, client: Client, request: Request) -> Self {
        Self {
            stop: Arc::new(Notify::new()),
            num_thread: num_thread.max(1),
            duration,
            client,
            request,
            handler: None,
        }
    }

    /// Attach a handler invoked, detached, for every successful response
    pub fn with_handler<H: ResponseHandler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn num_thread(&self) -> usize {
        self.num_thread
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Handle for stopping runs from another task or thread
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            signal: self.stop.clone(),
        }
    }

    /// End the current run early (see [`StopHandle`])
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Run one load test and return its report.
    ///
    /// Completes when every worker has passed the deadline, or as soon as a
    /// stop signal arrives. After a stop, records emitted by in-flight workers
    /// are not included.
    pub async fn start(&mut self) -> Report {
        // discard a stop that arrived between runs
        let _ = self.stop.notified().now_or_never();

        let started = std::time::Instant::now();
        let now = Instant::now();
        let deadline = now.checked_add(self.duration).unwrap_or(now + FAR_FUTURE);

        tracing::info!(
            threads = self.num_thread,
            duration_ms = self.duration.as_millis() as u64,
            method = %self.request.method(),
            url = %self.request.url(),
            "Starting load test"
        );

        let (record_tx, mut record_rx) = mpsc::channel::<Record>(self.num_thread * 2);
        let (done_tx, mut done_rx) = oneshot::channel::<()>();

        let mut workers = JoinSet::new();
        for _ in 0..self.num_thread {
            let worker = Worker {
                client: self.client.clone(),
                template: self.request.try_clone(),
                handler: self.handler.clone(),
                deadline,
                records: record_tx.clone(),
            };
            workers.spawn(worker.run());
        }
        drop(record_tx);

        tokio::spawn(async move {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "Worker task failed");
                }
            }
            let _ = done_tx.send(());
        });

        let mut records = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = self.stop.notified() => {
                    tracing::debug!(collected = records.len(), "Stop requested, ending run");
                    break;
                }
                _ = &mut done_rx => {
                    while let Ok(record) = record_rx.try_recv() {
                        records.push(record);
                    }
                    tracing::debug!(collected = records.len(), "All workers finished");
                    break;
                }
                Some(record) = record_rx.recv() => records.push(record),
            }
        }

        let elapsed = started.elapsed();
        let report = Report::from_records(records, elapsed);
        tracing::info!(
            total = report.total,
            errors = report.status_err,
            elapsed_ms = elapsed.as_millis() as u64,
            req_per_sec = report.req_per_sec,
            "Load test finished"
        );
        report
    }
}

/// Result of one attempt as seen by a worker
enum Attempt {
    /// Completed or failed for a reportable reason
    Done(Record, Option<CapturedResponse>),
    /// Aborted because the run deadline passed
    Expired,
}

struct Worker {
    client: Client,
    /// Per-worker copy of the request; `None` if the template is not cloneable
    template: Option<Request>,
    handler: Option<Arc<dyn ResponseHandler>>,
    deadline: Instant,
    records: mpsc::Sender<Record>,
}

impl Worker {
    async fn run(self) {
        let Worker {
            client,
            template,
            handler,
            deadline,
            records,
        } = self;

        while Instant::now() < deadline {
            let request = template.as_ref().and_then(Request::try_clone);
            let outcome = match request {
                Some(request) => attempt(&client, request, deadline, handler.is_some()).await,
                None => Attempt::Done(Record::failure(AttemptError::Clone), None),
            };
            let (record, response) = match outcome {
                Attempt::Done(record, response) => (record, response),
                Attempt::Expired => continue,
            };

            if let (Some(handler), Some(response)) = (&handler, response) {
                let handler = handler.clone();
                tokio::task::spawn_blocking(move || handler.handle(response));
            }

            if records.send(record).await.is_err() {
                // collector is gone
                break;
            }
        }
    }
}

/// One attempt bounded by the run deadline
async fn attempt(client: &Client, request: Request, deadline: Instant, capture: bool) -> Attempt {
    match tokio::time::timeout_at(deadline, execute(client, request, capture)).await {
        Ok(Ok((record, response))) => Attempt::Done(record, response),
        Ok(Err(err)) => Attempt::Done(Record::failure(err), None),
        Err(_) => Attempt::Expired,
    }
}

/// Send one request and read the full body
async fn execute(
    client: &Client,
    request: Request,
    capture: bool,
) -> std::result::Result<(Record, Option<CapturedResponse>), AttemptError> {
    let start = Instant::now();

    let response = client
        .execute(request)
        .await
        .map_err(AttemptError::from_send)?;
    let status = response.status();
    let version = response.version();
    let headers = capture.then(|| response.headers().clone());

    let body = response.bytes().await.map_err(AttemptError::from_body)?;
    let elapsed = start.elapsed();

    let record = Record::success(elapsed, status.as_u16(), body.len() as u64);
    let captured = headers.map(|headers| CapturedResponse {
        status,
        version,
        headers,
        body,
        elapsed,
    });
    Ok((record, captured))
}
