//! Recording sessions and windows

use std::collections::HashSet;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::cassette::{Cassette, Interaction, Request, Response};
use crate::config::SessionConfig;
use crate::network::{HyperClient, RealClient};
use crate::storage::{CassetteWriter, DirectorySource, FixtureSource, FsPersistence, Persistence};
use crate::{DvrError, Result};

use super::task::{Completion, Task, TaskKind};

/// Callback run once a recording window has been finalized
pub type WindowCallback = Box<dyn FnOnce(Result<WindowSummary>) + Send + 'static>;

/// Observer of task events, in the order tasks resolve
///
/// Both methods run after the session has booked the task's interaction.
/// Tasks dropped by [`Session::invalidate`] are never reported.
pub trait SessionDelegate: Send + Sync {
    /// A data or upload task resolved with a body
    fn did_receive_data(&self, _task: u64, _data: &Bytes) {}

    /// A task resolved, whether replayed or recorded
    fn did_complete(&self, _task: u64) {}
}

/// Outcome of a finalized recording window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSummary {
    /// Interactions completed during the window
    pub interactions: usize,
    /// Where the cassette was written, if anything was recorded
    pub persisted_to: Option<PathBuf>,
}

/// Entry point for recorded HTTP traffic
///
/// A session hands out [`Task`]s, replays them from the configured cassette
/// when it has a matching interaction, and otherwise records them through
/// the real client. Interactions completed during a recording window are
/// written to `<output_dir>/<cassette_name>.json` once the last task of the
/// window has resolved.
///
/// Without an explicit [`begin_window`](Session::begin_window) every task
/// gets a window of its own.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    config: SessionConfig,
    recording_enabled: AtomicBool,
    source: Arc<dyn FixtureSource>,
    client: Arc<dyn RealClient>,
    writer: CassetteWriter,
    delegate: Option<Arc<dyn SessionDelegate>>,
    next_task_id: AtomicU64,
    window: Mutex<WindowState>,
    failure: Mutex<Option<DvrError>>,
}

#[derive(Default)]
struct WindowState {
    recording: bool,
    needs_persistence: bool,
    outstanding: HashSet<u64>,
    completed: Vec<Interaction>,
    callbacks: Vec<WindowCallback>,
    epoch: u64,
}

/// Snapshot taken under the lock when a window is done
struct Finalization {
    interactions: Vec<Interaction>,
    persist: bool,
    callbacks: Vec<WindowCallback>,
}

impl WindowState {
    fn begin(&mut self) {
        if self.recording {
            return;
        }

        self.recording = true;
        self.needs_persistence = false;
        self.outstanding.clear();
        self.completed.clear();
        self.callbacks.clear();
    }

    fn take_finalization(&mut self) -> Option<Finalization> {
        if self.recording || !self.outstanding.is_empty() {
            return None;
        }

        Some(Finalization {
            interactions: mem::take(&mut self.completed),
            persist: mem::take(&mut self.needs_persistence),
            callbacks: mem::take(&mut self.callbacks),
        })
    }
}

/// Builder for [`Session`]
pub struct SessionBuilder {
    config: SessionConfig,
    client: Option<Arc<dyn RealClient>>,
    source: Option<Arc<dyn FixtureSource>>,
    persistence: Option<Arc<dyn Persistence>>,
    delegate: Option<Arc<dyn SessionDelegate>>,
}

impl SessionBuilder {
    /// Report task events to `delegate`
    #[must_use]
    pub fn delegate(mut self, delegate: Arc<dyn SessionDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Use a real client other than [`HyperClient`]
    #[must_use]
    pub fn client(mut self, client: Arc<dyn RealClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Look cassettes up somewhere other than `fixture_dir`
    #[must_use]
    pub fn source(mut self, source: Arc<dyn FixtureSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Persist cassettes with something other than the local filesystem
    #[must_use]
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Build the session
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn build(self) -> Result<Session> {
        self.config.validate()?;

        let source = self
            .source
            .unwrap_or_else(|| Arc::new(DirectorySource::new(self.config.fixture_dir())) as Arc<dyn FixtureSource>);
        let client = self
            .client
            .unwrap_or_else(|| Arc::new(HyperClient::new()) as Arc<dyn RealClient>);
        let persistence = self
            .persistence
            .unwrap_or_else(|| Arc::new(FsPersistence) as Arc<dyn Persistence>);

        let writer = CassetteWriter::new(&self.config.output_dir, persistence);

        info!(
            cassette = %self.config.cassette_name,
            fixture_dir = %self.config.fixture_dir().display(),
            output_dir = %self.config.output_dir.display(),
            recording_enabled = self.config.recording_enabled,
            "DVR session initialized"
        );

        Ok(Session {
            inner: Arc::new(SessionInner {
                recording_enabled: AtomicBool::new(self.config.recording_enabled),
                config: self.config,
                source,
                client,
                writer,
                delegate: self.delegate,
                next_task_id: AtomicU64::new(1),
                window: Mutex::new(WindowState::default()),
                failure: Mutex::new(None),
            }),
        })
    }
}

impl Session {
    /// Start building a session
    #[must_use]
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            client: None,
            source: None,
            persistence: None,
            delegate: None,
        }
    }

    /// Create a session over a real client, reading fixtures from disk
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: SessionConfig, client: Arc<dyn RealClient>) -> Result<Self> {
        Self::builder(config).client(client).build()
    }

    /// Cassette name
    #[must_use]
    pub fn cassette_name(&self) -> &str {
        self.inner.cassette_name()
    }

    /// Directory recorded cassettes are written to
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        self.inner.writer.output_dir()
    }

    /// Header names that take part in matching
    #[must_use]
    pub fn headers_to_check(&self) -> &[String] {
        self.inner.headers_to_check()
    }

    /// Whether unmatched requests may go to the network
    #[must_use]
    pub fn recording_enabled(&self) -> bool {
        self.inner.recording_enabled()
    }

    /// Allow or forbid recording
    pub fn set_recording_enabled(&self, enabled: bool) {
        self.inner.recording_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Cassette used for replay, if one exists
    #[must_use]
    pub fn cassette(&self) -> Option<Arc<Cassette>> {
        self.inner.current_cassette()
    }

    /// Whether a recording window is open
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.inner.window().recording
    }

    /// Take the persistence failure of a window nobody was waiting on
    ///
    /// Windows without a callback, such as the implicit one around a lone
    /// task, keep their failure here. The next [`Task::resume`] also returns
    /// it.
    pub fn take_error(&self) -> Option<DvrError> {
        self.inner.take_failure()
    }

    /// Number of tasks the current window is waiting on
    #[must_use]
    pub fn outstanding_tasks(&self) -> usize {
        self.inner.window().outstanding.len()
    }

    /// Create a task for `request`
    ///
    /// The real client's default headers are merged into the request (values
    /// already on the request win); upload tasks also get their body. The
    /// task is registered with the current window, or with a window of its
    /// own if none is open.
    pub fn create_task(
        &self,
        request: Request,
        kind: TaskKind,
        completion: Option<Completion>,
    ) -> Task {
        let mut request = request.appending_headers(&self.inner.client.default_headers());
        if let TaskKind::Upload(body) = &kind {
            request = request.appending_body(body.clone());
        }

        let id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);

        let epoch = {
            let mut window = self.inner.window();
            let implicit = !window.recording;
            if implicit {
                window.begin();
            }

            window.outstanding.insert(id);

            // Closing cannot finalize here, the new task is outstanding
            if implicit {
                window.recording = false;
            }
            window.epoch
        };

        debug!(task = id, kind = ?kind, method = %request.method, url = %request.url, "Created task");

        Task::new(
            id,
            epoch,
            Arc::downgrade(&self.inner),
            kind,
            request,
            completion,
        )
    }

    /// Create a data task
    pub fn data_task<F>(&self, request: Request, completion: F) -> Task
    where
        F: FnOnce(Response, Option<Bytes>) + Send + 'static,
    {
        self.create_task(request, TaskKind::Data, Some(Completion::data(completion)))
    }

    /// Create a download task
    pub fn download_task<F>(&self, request: Request, completion: F) -> Task
    where
        F: FnOnce(Response, Option<PathBuf>) + Send + 'static,
    {
        self.create_task(
            request,
            TaskKind::Download,
            Some(Completion::download(completion)),
        )
    }

    /// Create an upload task sending `body`
    pub fn upload_task<F>(&self, request: Request, body: impl Into<Bytes>, completion: F) -> Task
    where
        F: FnOnce(Response, Option<Bytes>) + Send + 'static,
    {
        self.create_task(
            request,
            TaskKind::Upload(body.into()),
            Some(Completion::data(completion)),
        )
    }

    /// Create an upload task sending the contents of a file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read
    pub fn upload_task_from_file<F>(&self, request: Request, path: &Path, completion: F) -> Result<Task>
    where
        F: FnOnce(Response, Option<Bytes>) + Send + 'static,
    {
        let body = std::fs::read(path)?;
        Ok(self.upload_task(request, body, completion))
    }

    /// Open a recording window
    ///
    /// Does nothing if one is already open. Only needed when several tasks
    /// should be persisted together.
    pub fn begin_window(&self) {
        let mut window = self.inner.window();
        if !window.recording {
            window.begin();
            debug!(cassette = %self.cassette_name(), "Recording window opened");
        }
    }

    /// Close the recording window
    ///
    /// `on_done` runs after the last outstanding task has resolved and the
    /// cassette has been persisted. Returns `false`, dropping `on_done`, if no
    /// window was open.
    pub fn end_window(&self, on_done: Option<WindowCallback>) -> bool {
        let finalization = {
            let mut window = self.inner.window();
            if !window.recording {
                return false;
            }

            window.recording = false;
            window.callbacks.extend(on_done);
            debug!(
                cassette = %self.cassette_name(),
                outstanding = window.outstanding.len(),
                "Recording window closed"
            );
            window.take_finalization()
        };

        if let Some(finalization) = finalization {
            self.inner.finalize(finalization);
        }
        true
    }

    /// Close the recording window and wait until it is finalized
    ///
    /// # Errors
    ///
    /// - `WindowNotOpen` if no window was open, or the session was
    ///   invalidated before the window finished
    /// - `PersistenceFailure` if the cassette could not be written
    pub async fn finish_window(&self) -> Result<WindowSummary> {
        let (tx, rx) = oneshot::channel();
        let callback: WindowCallback = Box::new(move |result| {
            let _ = tx.send(result);
        });

        if !self.end_window(Some(callback)) {
            return Err(DvrError::WindowNotOpen);
        }

        rx.await.map_err(|_| DvrError::WindowNotOpen)?
    }

    /// Cancel everything
    ///
    /// Closes the window without persisting, forgets outstanding tasks and
    /// cancels in-flight real calls. Tasks that resolve afterwards are ignored.
    pub fn invalidate(&self) {
        {
            let mut window = self.inner.window();
            let epoch = window.epoch + 1;
            *window = WindowState {
                epoch,
                ..WindowState::default()
            };
        }

        info!(cassette = %self.cassette_name(), "Session invalidated");
        self.inner.client.cancel_all();
    }
}

impl SessionInner {
    fn window(&self) -> MutexGuard<'_, WindowState> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn cassette_name(&self) -> &str {
        &self.config.cassette_name
    }

    pub(crate) fn headers_to_check(&self) -> &[String] {
        &self.config.headers_to_check
    }

    pub(crate) fn recording_enabled(&self) -> bool {
        self.recording_enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn client(&self) -> &Arc<dyn RealClient> {
        &self.client
    }

    pub(crate) fn current_cassette(&self) -> Option<Arc<Cassette>> {
        self.source.cassette(self.cassette_name())
    }

    pub(crate) fn take_failure(&self) -> Option<DvrError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Record the outcome of a task
    pub(crate) fn resolve_task(
        &self,
        id: u64,
        epoch: u64,
        kind: &TaskKind,
        interaction: Interaction,
        was_replay: bool,
    ) {
        let data = interaction.response_data.clone();

        let finalization = {
            let mut window = self.window();
            if window.epoch != epoch {
                debug!(task = id, "Ignoring task from an invalidated window");
                return;
            }

            window.needs_persistence |= !was_replay;
            window.outstanding.remove(&id);
            window.completed.push(interaction);
            window.take_finalization()
        };

        if let Some(finalization) = finalization {
            self.finalize(finalization);
        }

        if let Some(delegate) = &self.delegate {
            if !matches!(kind, TaskKind::Download) {
                if let Some(data) = &data {
                    delegate.did_receive_data(id, data);
                }
            }
            delegate.did_complete(id);
        }
    }

    /// Forget a task that ended without an interaction
    pub(crate) fn discard_task(&self, id: u64, epoch: u64) {
        let finalization = {
            let mut window = self.window();
            if window.epoch != epoch || !window.outstanding.remove(&id) {
                return;
            }
            window.take_finalization()
        };

        if let Some(finalization) = finalization {
            self.finalize(finalization);
        }
    }

    fn finalize(&self, finalization: Finalization) {
        let Finalization {
            interactions,
            persist,
            callbacks,
        } = finalization;

        let count = interactions.len();
        let result = if persist {
            let cassette = Cassette::new(self.cassette_name(), interactions);
            self.writer.persist(&cassette).map(|path| WindowSummary {
                interactions: count,
                persisted_to: Some(path),
            })
        } else {
            Ok(WindowSummary {
                interactions: count,
                persisted_to: None,
            })
        };

        info!(
            cassette = %self.cassette_name(),
            interactions = count,
            persisted = persist,
            "Recording window finished"
        );

        match result {
            Ok(summary) => {
                for callback in callbacks {
                    callback(Ok(summary.clone()));
                }
            }
            Err(e) => {
                let message = match e {
                    DvrError::PersistenceFailure(message) => message,
                    other => other.to_string(),
                };

                if callbacks.is_empty() {
                    *self.failure.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(DvrError::PersistenceFailure(message));
                    return;
                }

                for callback in callbacks {
                    callback(Err(DvrError::PersistenceFailure(message.clone())));
                }
            }
        }
    }
}
