//! One annotation run: request, stream, pace, render.
//!
//! `idle -> requesting -> streaming -> idle` on success and
//! `idle -> requesting -> failed -> idle` otherwise. Progress is reported as
//! [`PipelineEvent`]s over a channel so the owner of the screen stays the only
//! writer to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use boxreader_core::SelectionModel;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::config::AiConfig;
use crate::error::AnnotateError;
use crate::pacer::{StreamPacer, PACE_INTERVAL};
use crate::payload::{extract_full_text, AnnotationRequest, ChatRequest};
use crate::render::{render_snapshot, Formatter, RenderJob, RenderScheduler, EMPTY_OUTPUT};
use crate::sse::{parse_delta, SseDecoder};
use crate::transport::{CompletionTransport, HttpRequest, HttpResponse};

pub const STATUS_ANALYZING: &str = "Analyzing…";
pub const STATUS_COMPLETE: &str = "Analysis complete.";
pub const STATUS_ERROR: &str = "Request error, check network or configuration.";
pub const STATUS_STALE: &str = "Selection changed; results may be stale.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Requesting,
    Streaming,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    State(PipelineState),
    Status { message: String, is_error: bool },
    /// Formatted output; `version` only ever increases across one run.
    Output { version: u64, content: String },
    Finished(RunOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The service answered with a non-success status.
    Rejected { status: u16 },
    Failed,
}

/// A validated request, ready to send.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub request: AnnotationRequest,
    pub http: HttpRequest,
}

type Events = mpsc::UnboundedSender<PipelineEvent>;

fn emit(events: &Events, event: PipelineEvent) {
    // the receiver going away only means nobody is watching any more
    let _ = events.send(event);
}

fn status(events: &Events, message: impl Into<String>, is_error: bool) {
    emit(
        events,
        PipelineEvent::Status {
            message: message.into(),
            is_error,
        },
    );
}

struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct AnnotationPipeline {
    transport: Arc<dyn CompletionTransport>,
    formatter: Arc<dyn Formatter>,
    in_progress: Arc<AtomicBool>,
    last_signature: Arc<Mutex<Option<String>>>,
    pace: Duration,
}

impl AnnotationPipeline {
    pub fn new(transport: Arc<dyn CompletionTransport>, formatter: Arc<dyn Formatter>) -> Self {
        Self {
            transport,
            formatter,
            in_progress: Arc::new(AtomicBool::new(false)),
            last_signature: Arc::new(Mutex::new(None)),
            pace: PACE_INTERVAL,
        }
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Whether `current` differs from the selection the last run started with.
    pub fn is_stale(&self, current_signature: &str) -> bool {
        self.last_signature
            .lock()
            .as_deref()
            .is_some_and(|signature| signature != current_signature)
    }

    /// Checks every precondition without touching any state.
    pub fn prepare(
        &self,
        config: &AiConfig,
        selection: &SelectionModel,
        instruction: &str,
    ) -> Result<PreparedRequest, AnnotateError> {
        if self.is_running() {
            return Err(AnnotateError::AlreadyRunning);
        }
        if selection.is_empty() {
            return Err(AnnotateError::EmptySelection);
        }
        config.validate()?;
        let request = AnnotationRequest::from_selection(selection, instruction);
        if request.text.trim().is_empty() {
            return Err(AnnotateError::EmptyText);
        }
        let body = ChatRequest::new(config, &request).to_bytes()?;
        Ok(PreparedRequest {
            http: HttpRequest {
                url: config.endpoint(),
                api_key: config.api_key.trim().to_string(),
                body,
            },
            request,
        })
    }

    /// Runs one request to completion. Only a concurrent run is reported as
    /// an error; every other failure ends up in the event stream.
    #[instrument(skip_all, fields(count = prepared.request.meta.count))]
    pub async fn run(
        &self,
        prepared: PreparedRequest,
        events: Events,
    ) -> Result<RunOutcome, AnnotateError> {
        if self.in_progress.swap(true, Ordering::AcqRel) {
            return Err(AnnotateError::AlreadyRunning);
        }
        let _guard = RunGuard(Arc::clone(&self.in_progress));
        *self.last_signature.lock() = Some(prepared.request.signature.clone());

        emit(&events, PipelineEvent::State(PipelineState::Requesting));
        status(&events, STATUS_ANALYZING, false);

        let mut output = OutputRenderer::new(Arc::clone(&self.formatter), events.clone());
        output.show_placeholder();

        let outcome = match self.exchange(prepared.http, &mut output, &events).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%err, "annotation request failed");
                status(&events, STATUS_ERROR, true);
                RunOutcome::Failed
            }
        };
        output.drain().await;

        match outcome {
            RunOutcome::Completed => info!("annotation complete"),
            RunOutcome::Rejected { status } => info!(status, "annotation rejected by service"),
            RunOutcome::Failed => emit(&events, PipelineEvent::State(PipelineState::Failed)),
        }
        emit(&events, PipelineEvent::State(PipelineState::Idle));
        emit(&events, PipelineEvent::Finished(outcome));
        Ok(outcome)
    }

    async fn exchange(
        &self,
        request: HttpRequest,
        output: &mut OutputRenderer,
        events: &Events,
    ) -> Result<RunOutcome, AnnotateError> {
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            let status_code = response.status;
            let body = response.text().await.unwrap_or_default();
            status(events, format!("Request failed: {status_code}"), true);
            emit(events, PipelineEvent::State(PipelineState::Failed));
            output.request(body);
            return Ok(RunOutcome::Rejected {
                status: status_code,
            });
        }

        if response.is_event_stream() {
            self.stream(response, output, events).await?;
        } else {
            let body = response.text().await?;
            let value: serde_json::Value = serde_json::from_str(&body)
                .map_err(|err| AnnotateError::Stream(err.to_string()))?;
            output.request(extract_full_text(&value).unwrap_or_default());
        }
        status(events, STATUS_COMPLETE, false);
        Ok(RunOutcome::Completed)
    }

    async fn stream(
        &self,
        mut response: HttpResponse,
        output: &mut OutputRenderer,
        events: &Events,
    ) -> Result<(), AnnotateError> {
        emit(events, PipelineEvent::State(PipelineState::Streaming));
        let mut decoder = SseDecoder::new();
        let mut pacer = StreamPacer::new();
        let mut accumulated = String::new();
        let mut ticker = tokio::time::interval(self.pace);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        pacer.start();

        let result = loop {
            tokio::select! {
                chunk = response.body.recv() => match chunk {
                    Some(Ok(bytes)) => {
                        for data in decoder.push(&bytes) {
                            match parse_delta(&data) {
                                Some(delta) => {
                                    accumulated.push_str(&delta);
                                    pacer.push(&delta);
                                }
                                None => debug!(frame = %data, "skipping frame without delta"),
                            }
                        }
                    }
                    Some(Err(err)) => break Err(err),
                    None => break Ok(()),
                },
                _ = ticker.tick() => {
                    if pacer.tick() {
                        output.request(pacer.displayed().to_string());
                    }
                }
                finished = output.next_completion(), if output.is_busy() => {
                    output.complete(finished);
                }
            }
        };

        pacer.stop();
        output.request(accumulated);
        result
    }
}

/// Runs formatter jobs one at a time on the blocking pool and publishes only
/// results that are still current.
struct OutputRenderer {
    scheduler: RenderScheduler,
    formatter: Arc<dyn Formatter>,
    in_flight: Option<JoinHandle<(u64, String)>>,
    events: Events,
}

impl OutputRenderer {
    fn new(formatter: Arc<dyn Formatter>, events: Events) -> Self {
        Self {
            scheduler: RenderScheduler::new(),
            formatter,
            in_flight: None,
            events,
        }
    }

    fn show_placeholder(&self) {
        emit(
            &self.events,
            PipelineEvent::Output {
                version: self.scheduler.version(),
                content: EMPTY_OUTPUT.to_string(),
            },
        );
    }

    fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    fn request(&mut self, snapshot: String) {
        if let Some(job) = self.scheduler.request(snapshot) {
            self.spawn(job);
        }
    }

    fn spawn(&mut self, job: RenderJob) {
        let formatter = Arc::clone(&self.formatter);
        self.in_flight = Some(tokio::task::spawn_blocking(move || {
            let content = render_snapshot(formatter.as_ref(), &job.snapshot);
            (job.version, content)
        }));
    }

    async fn next_completion(&mut self) -> Option<(u64, String)> {
        let handle = self.in_flight.as_mut()?;
        let result = handle.await;
        self.in_flight = None;
        match result {
            Ok(done) => Some(done),
            Err(err) => {
                warn!(?err, "render task failed");
                None
            }
        }
    }

    fn complete(&mut self, finished: Option<(u64, String)>) {
        if let Some((version, content)) = finished {
            if self.scheduler.accepts(version) {
                emit(&self.events, PipelineEvent::Output { version, content });
            } else {
                debug!(version, latest = self.scheduler.version(), "dropping stale render");
            }
        }
        if let Some(job) = self.scheduler.finish() {
            self.spawn(job);
        }
    }

    /// Waits until the last requested snapshot has been rendered.
    async fn drain(&mut self) {
        while self.is_busy() {
            let finished = self.next_completion().await;
            self.complete(finished);
        }
    }
}
