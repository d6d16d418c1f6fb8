//! DVR - deterministic HTTP record/replay for network-dependent tests
//!
//! A [`Session`] replays interactions from a named cassette and records the
//! ones it has never seen, writing them back as JSON once the recording
//! window finishes.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::multiple_crate_versions
)]

pub mod cassette;
pub mod config;
pub mod error;
pub mod matching;
pub mod network;
pub mod recording;
pub mod storage;

pub use cassette::{Cassette, Interaction, Request, Response};
pub use config::SessionConfig;
pub use error::{DvrError, Result};
pub use recording::{
    Completion, Session, SessionBuilder, SessionDelegate, Task, TaskKind, TaskState, WindowSummary,
};
