//! scribepool - crowdsourced transcription bookkeeping
//!
//! Uploads a project's audio chunks to a remote store, advertises each chunk
//! as a paid task on a labor marketplace, and tracks every chunk's progress
//! in an on-disk record table.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod assign;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod marketplace;
pub mod project;
pub mod qualification;
pub mod remote;
pub mod timespec;

// Pipeline
pub use assign::{AssignReport, RowState, RunContext, Template, assign};

// Collaborator seams
pub use marketplace::{Marketplace, MockMarketplace, Task, TaskOptions};
pub use remote::{MemoryRemote, Remote, S3Remote, SftpRemote, Stream};

// State
pub use project::{Asset, Project, Record, RecordStore, UploadStatus};

// Error handling
pub use error::{Result, ScribepoolError};

// Config
pub use config::{AssignmentConfig, AssignmentField, Config, Reward};
pub use qualification::Qualification;
pub use timespec::Timespec;
