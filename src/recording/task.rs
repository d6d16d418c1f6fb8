//! Tasks: one outgoing HTTP operation each

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tempfile::NamedTempFile;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::cassette::{Interaction, Request, Response};
use crate::matching::request_debug_key;
use crate::network::Exchange;
use crate::{DvrError, Result};

use super::session::SessionInner;

/// Completion for data and upload tasks
pub type DataCompletion = Box<dyn FnOnce(Response, Option<Bytes>) + Send + 'static>;

/// Completion for download tasks; receives the file holding the body
///
/// The file is not cleaned up by the session. The completion owns it and
/// should move or delete it.
pub type DownloadCompletion = Box<dyn FnOnce(Response, Option<PathBuf>) + Send + 'static>;

/// User-visible completion callback
///
/// The variant decides how the body is handed over.
pub enum Completion {
    /// Body delivered in memory
    Data(DataCompletion),
    /// Body written to a file first
    Download(DownloadCompletion),
}

impl Completion {
    /// Wrap a data completion
    pub fn data<F>(f: F) -> Self
    where
        F: FnOnce(Response, Option<Bytes>) + Send + 'static,
    {
        Self::Data(Box::new(f))
    }

    /// Wrap a download completion
    pub fn download<F>(f: F) -> Self
    where
        F: FnOnce(Response, Option<PathBuf>) + Send + 'static,
    {
        Self::Download(Box::new(f))
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(_) => f.write_str("Completion::Data"),
            Self::Download(_) => f.write_str("Completion::Download"),
        }
    }
}

/// Flavor of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Plain data exchange
    Data,
    /// Response body saved to a file
    Download,
    /// Request body taken from the given bytes
    Upload(Bytes),
}

/// Lifecycle of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not yet resumed
    Constructed,
    /// Resumed and waiting for a replay or a real response
    Activated,
    /// Cancelled while activated
    Canceling,
    /// Finished; no further transitions
    Resolved,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Constructed => "constructed",
            Self::Activated => "activated",
            Self::Canceling => "canceling",
            Self::Resolved => "resolved",
        };
        f.write_str(name)
    }
}

/// Handle to one outgoing HTTP operation
///
/// Created by [`Session`](super::Session); nothing happens until
/// [`resume`](Task::resume) is called.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    id: u64,
    epoch: u64,
    session: Weak<SessionInner>,
    kind: TaskKind,
    request: Request,
    completion: Mutex<Option<Completion>>,
    cancelled: AtomicBool,
    state: Mutex<TaskState>,
    interaction: OnceLock<Interaction>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Task {
    pub(crate) fn new(
        id: u64,
        epoch: u64,
        session: Weak<SessionInner>,
        kind: TaskKind,
        request: Request,
        completion: Option<Completion>,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id,
                epoch,
                session,
                kind,
                request,
                completion: Mutex::new(completion),
                cancelled: AtomicBool::new(false),
                state: Mutex::new(TaskState::Constructed),
                interaction: OnceLock::new(),
            }),
        }
    }

    /// Task identifier, unique within its session
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Task flavor
    #[must_use]
    pub fn kind(&self) -> &TaskKind {
        &self.inner.kind
    }

    /// Request as it will be matched and sent
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TaskState {
        *lock(&self.inner.state)
    }

    /// Whether [`cancel`](Task::cancel) was called
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Interaction the task resolved with
    #[must_use]
    pub fn interaction(&self) -> Option<&Interaction> {
        self.inner.interaction.get()
    }

    /// Response the task resolved with
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        self.interaction().map(|interaction| &interaction.response)
    }

    /// Suppress the completion callback
    ///
    /// An in-flight real call is not aborted; its result is still reported
    /// to the session.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);

        let mut state = lock(&self.inner.state);
        if *state == TaskState::Activated {
            *state = TaskState::Canceling;
        }
    }

    /// Start the task
    ///
    /// A matching interaction in the session's cassette is replayed
    /// asynchronously. Without a cassette the request goes to the real
    /// client. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `PersistenceFailure` if an earlier window failed to save its cassette
    ///   and nobody has taken the error yet
    /// - `FixtureMismatch` if a cassette exists but has no matching interaction
    /// - `RecordingDisabled` if there is no cassette and recording is off
    /// - `InvalidTaskState` if the task was already resumed
    /// - `Other` if called outside a Tokio runtime
    pub fn resume(&self) -> Result<()> {
        {
            let mut state = lock(&self.inner.state);
            if *state != TaskState::Constructed {
                return Err(DvrError::InvalidTaskState {
                    id: self.inner.id,
                    state: state.to_string(),
                });
            }
            *state = TaskState::Activated;
        }

        let session = self
            .inner
            .session
            .upgrade()
            .ok_or_else(|| DvrError::Other("Session was dropped before the task resumed".to_string()))?;

        if let Some(e) = session.take_failure() {
            error!(task = self.inner.id, "Refusing to resume after a failed window: {e}");
            self.abandon(&session);
            return Err(e);
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.abandon(&session);
                return Err(DvrError::Other(format!(
                    "Task resumed outside a Tokio runtime: {e}"
                )));
            }
        };

        let request = &self.inner.request;
        let cassette = session.current_cassette();

        if let Some(cassette) = &cassette {
            if let Some(interaction) =
                cassette.interaction_for_request(request, session.headers_to_check())
            {
                debug!(
                    task = self.inner.id,
                    cassette = %cassette.name(),
                    request = %request_debug_key(request),
                    "Replaying interaction"
                );
                let inner = Arc::clone(&self.inner);
                runtime.spawn(replay(inner, interaction.clone()));
                return Ok(());
            }
        }

        if cassette.is_some() {
            let request_key = request_debug_key(request);
            error!(
                task = self.inner.id,
                cassette = %session.cassette_name(),
                request = %request_key,
                "Invalid request. The request was not found in the cassette"
            );
            self.abandon(&session);
            return Err(DvrError::FixtureMismatch {
                cassette: session.cassette_name().to_string(),
                request: request_key,
            });
        }

        if !session.recording_enabled() {
            error!(
                task = self.inner.id,
                cassette = %session.cassette_name(),
                "Recording is disabled and the cassette is missing"
            );
            self.abandon(&session);
            return Err(DvrError::RecordingDisabled {
                cassette: session.cassette_name().to_string(),
            });
        }

        debug!(
            task = self.inner.id,
            request = %request_debug_key(request),
            "Cassette missing, recording"
        );
        let call = session.client().perform(request.clone());
        let inner = Arc::clone(&self.inner);
        runtime.spawn(record(inner, call));

        Ok(())
    }

    fn abandon(&self, session: &SessionInner) {
        *lock(&self.inner.state) = TaskState::Resolved;
        session.discard_task(self.inner.id, self.inner.epoch);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("request", &request_debug_key(&self.inner.request))
            .field("state", &self.state())
            .finish()
    }
}

async fn replay(task: Arc<TaskInner>, interaction: Interaction) {
    // Never complete in the caller's turn, like a real network call
    tokio::task::yield_now().await;

    task.deliver(&interaction);
    task.resolve(interaction, true);
}

async fn record(task: Arc<TaskInner>, call: BoxFuture<'static, Result<Exchange>>) {
    let exchange = match call.await {
        Ok(exchange) => exchange,
        Err(e) => {
            warn!(
                task = task.id,
                request = %request_debug_key(&task.request),
                "Failed to record because the task returned no response: {e}"
            );
            task.drop_unresolved();
            return;
        }
    };

    let interaction = Interaction::new(task.request.clone(), exchange.response, exchange.body);
    task.deliver(&interaction);
    task.resolve(interaction, false);
}

impl TaskInner {
    /// Hand the result to the completion unless the task was cancelled
    fn deliver(&self, interaction: &Interaction) {
        let Some(completion) = lock(&self.completion).take() else {
            return;
        };

        if self.cancelled.load(Ordering::SeqCst) || *lock(&self.state) == TaskState::Canceling {
            debug!(task = self.id, "Task cancelled, skipping completion");
            return;
        }

        let response = interaction.response.clone();
        match completion {
            Completion::Data(completion) => completion(response, interaction.response_data.clone()),
            Completion::Download(completion) => {
                let location = interaction
                    .response_data
                    .as_deref()
                    .and_then(|data| match write_download(data) {
                        Ok(path) => Some(path),
                        Err(e) => {
                            warn!(task = self.id, "Failed to write download: {e}");
                            None
                        }
                    });
                completion(response, location);
            }
        }
    }

    fn resolve(&self, interaction: Interaction, was_replay: bool) {
        let _ = self.interaction.set(interaction.clone());
        *lock(&self.state) = TaskState::Resolved;

        match self.session.upgrade() {
            Some(session) => {
                session.resolve_task(self.id, self.epoch, &self.kind, interaction, was_replay);
            }
            None => debug!(task = self.id, "Session dropped before the task resolved"),
        }
    }

    fn drop_unresolved(&self) {
        *lock(&self.state) = TaskState::Resolved;

        if let Some(session) = self.session.upgrade() {
            session.discard_task(self.id, self.epoch);
        }
    }
}

/// Write a downloaded body to a file that outlives the task and the session
fn write_download(data: &[u8]) -> Result<PathBuf> {
    let mut file = NamedTempFile::new()?;
    file.write_all(data)?;
    file.into_temp_path()
        .keep()
        .map_err(|e| DvrError::Io(e.error))
}
