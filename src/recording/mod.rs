//! Sessions, recording windows and tasks

mod session;
mod task;

pub use session::{Session, SessionBuilder, SessionDelegate, WindowCallback, WindowSummary};
pub use task::{Completion, DataCompletion, DownloadCompletion, Task, TaskKind, TaskState};
