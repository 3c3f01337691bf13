//! Autosave engine for hosted multi-file projects.
//!
//! Edits land in a [`FileSet`] which tracks per-file dirty state. A
//! [`Session`] turns dirty files into saves: a backoff timer coalesces bursts
//! of edits into one sweep, each sweep enqueues a single save on the session's
//! [`SerialQueue`](quill_worker::SerialQueue), and failed saves are classified
//! and retried with exponential spacing.
//!
//! Transport is abstracted behind [`FileStore`]; [`MemoryStore`] is an
//! in-process implementation for tests and simulation.

mod classify;
mod files;
mod memory;
mod notices;
mod session;
mod settings;
mod store;

pub use classify::{ClassifiedError, DEFAULT_ERROR_HEADER, ErrorCategory, ErrorClassifier, Failure, Response};
pub use files::{EditOutcome, FileRecord, FileSet, SaveState, normalize_path};
pub use memory::{MemoryStore, StoreCall, StoreOp};
pub use notices::{Notice, NoticeCenter, NoticeLevel};
pub use session::{SAVING_STATUS, Session, SessionError};
pub use settings::{AutosaveSettings, SettingsError};
pub use store::{FetchedFile, FileStore, ProjectConfig, RemoteFile, normalize_mime};
