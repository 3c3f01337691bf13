//! Autosave orchestration for one open project.
//!
//! A [`Session`] owns the project's [`FileSet`], one [`SerialQueue`] through
//! which every store call is issued, and one [`Backoff`] that paces sweeps.
//! Edits flip files dirty; the clean-to-dirty edge arms a sweep, and each
//! sweep enqueues a save for the first dirty file. Failed saves re-mark the
//! file and, unless the backend rejected the write, arm the next sweep with a
//! doubled delay.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use quill_worker::{Backoff, SerialQueue, Step, Task, delay_millis, join_error_panic_message};
use thiserror::Error;

use crate::classify::{ClassifiedError, ErrorClassifier, Failure};
use crate::files::{EditOutcome, FileRecord, FileSet, SaveState, normalize_path};
use crate::notices::{Notice, NoticeCenter};
use crate::settings::AutosaveSettings;
use crate::store::{FileStore, ProjectConfig};

/// Status line shown while a save is in flight.
pub const SAVING_STATUS: &str = "Saving…";

/// Errors returned directly to callers of [`Session`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
	#[error("failed to open project: {0}")]
	Open(ClassifiedError),

	#[error("no file is selected")]
	NoActiveFile,

	#[error("unknown file: {0}")]
	UnknownFile(String),

	#[error("invalid path: {0:?}")]
	InvalidPath(String),

	#[error("{0} already exists")]
	PathExists(String),

	#[error("unsaved files: {}", .0.join(", "))]
	Unsaved(Vec<String>),
}

struct SessionState {
	files: FileSet,
	notices: NoticeCenter,
	/// Path whose `put` is currently outstanding.
	saving: Option<String>,
}

struct SessionInner {
	store: Arc<dyn FileStore>,
	config: Arc<ProjectConfig>,
	classifier: ErrorClassifier,
	queue: SerialQueue,
	backoff: Backoff,
	state: Mutex<SessionState>,
}

impl SessionInner {
	/// Arms a sweep unless one is already pending.
	///
	/// The timer only holds a weak handle, so a dropped session never sweeps.
	fn arm_sweep(self: &Arc<Self>) {
		let weak: Weak<Self> = Arc::downgrade(self);
		let armed = self.backoff.schedule_once(move || {
			if let Some(inner) = weak.upgrade() {
				inner.sweep();
			}
		});
		if armed {
			tracing::debug!(delay_ms = delay_millis(self.backoff.current()), "autosave.sweep_armed");
		}
	}

	fn sweep(self: &Arc<Self>) {
		let next = self.state.lock().files.next_to_save().map(str::to_string);
		match next {
			Some(path) => {
				tracing::debug!(path = %path, "autosave.sweep");
				self.queue.enqueue(self.save_task(path));
			}
			None => tracing::trace!("autosave.sweep_idle"),
		}
	}

	/// Builds a task that writes `path`'s contents as they are when the task
	/// starts, not when it was enqueued.
	fn save_task(self: &Arc<Self>, path: String) -> Task {
		let inner = Arc::clone(self);
		Task::new(format!("save:{path}"), move || {
			let contents = {
				let mut state = inner.state.lock();
				let Some(contents) = state.files.begin_save(&path) else {
					return Ok(Step::Ready);
				};
				state.notices.set_status(SAVING_STATUS);
				state.saving = Some(path.clone());
				contents
			};
			tracing::debug!(path = %path, bytes = contents.len(), "autosave.save");
			Ok(Step::wait(async move {
				// The put runs as its own task so a panicking store still
				// settles the save as a retryable fault.
				let store = Arc::clone(&inner.store);
				let target = path.clone();
				let put = quill_worker::spawn("autosave.put", async move { store.put(&target, &contents).await });
				let result = match put.await {
					Ok(result) => result,
					Err(err) => Err(Failure::fault(match join_error_panic_message(err) {
						Some(message) => format!("store panicked: {message}"),
						None => "store request cancelled".to_string(),
					})),
				};
				inner.finish_save(&path, result);
			}))
		})
	}

	fn finish_save(self: &Arc<Self>, path: &str, result: Result<(), Failure>) {
		let failure = match result {
			Ok(()) => {
				let more = {
					let mut state = self.state.lock();
					state.saving = None;
					state.notices.clear_status();
					state.files.next_to_save().is_some()
				};
				self.backoff.reset();
				tracing::debug!(path = %path, more, "autosave.saved");
				if more {
					self.arm_sweep();
				}
				return;
			}
			Err(failure) => failure,
		};

		let error = self.classifier.classify(&failure);
		let retryable = error.is_retryable();
		let delay = retryable.then(|| self.backoff.next_delay());
		{
			let mut state = self.state.lock();
			state.saving = None;
			state.files.save_failed(path, retryable);
			state.notices.set_status(format!("Failed to save {path}"));
			let context = match delay {
				Some(delay) => format!("Failed to save {path}; retrying in {delay:?}"),
				None => format!("Failed to save {path}"),
			};
			state.notices.push(Notice::failure(&context, &error));
		}
		tracing::warn!(
			path = %path,
			category = error.category().as_str(),
			retry_ms = delay.map(delay_millis),
			error = %error,
			"autosave.save_failed"
		);
		if retryable {
			self.arm_sweep();
		}
	}

	fn report(&self, context: &str, error: &ClassifiedError) {
		tracing::warn!(category = error.category().as_str(), error = %error, "{context}");
		self.state.lock().notices.push(Notice::failure(context, error));
	}

	fn load_task(self: &Arc<Self>, path: String) -> Task {
		let inner = Arc::clone(self);
		Task::future(format!("load:{path}"), async move {
			match inner.store.get(&path).await {
				Ok(fetched) => {
					let (loaded, dirty) = {
						let mut state = inner.state.lock();
						let loaded = state.files.load(&path, fetched);
						(loaded, state.files.get(&path).is_some_and(|record| record.state() == SaveState::Dirty))
					};
					tracing::debug!(path = %path, loaded, dirty, "autosave.load");
					// Flagged before its contents arrived; sweeps skipped it until now.
					if dirty {
						inner.arm_sweep();
					}
				}
				Err(failure) => inner.report(&format!("Failed to load {path}"), &inner.classifier.classify(&failure)),
			}
			Ok(())
		})
	}

	fn select(self: &Arc<Self>, path: &str) -> Result<(), SessionError> {
		let (previous, needs_load) = {
			let mut state = self.state.lock();
			let Some(target) = state.files.get(path) else {
				return Err(SessionError::UnknownFile(path.to_string()));
			};
			let needs_load = !target.is_loaded();
			let previous = state
				.files
				.active()
				.filter(|active| *active != path)
				.and_then(|active| state.files.get(active))
				.filter(|record| record.state() == SaveState::Dirty)
				.map(|record| record.name().to_string());
			state.files.set_active(path);
			(previous, needs_load)
		};
		tracing::debug!(path = %path, needs_load, "autosave.select");

		if let Some(previous) = previous {
			self.queue.enqueue(self.save_task(previous));
		}
		if needs_load {
			self.queue.enqueue(self.load_task(path.to_string()));
		}
		Ok(())
	}

	fn reselect_first(self: &Arc<Self>) {
		let first = self.state.lock().files.first_path().map(str::to_string);
		if let Some(first) = first
			&& let Err(err) = self.select(&first)
		{
			tracing::warn!(path = %first, error = %err, "autosave.reselect_failed");
		}
	}
}

/// Handle to an open project. Clones share the same session.
#[derive(Clone)]
pub struct Session {
	inner: Arc<SessionInner>,
}

impl Session {
	/// Fetches the project config and file listing, then selects the first
	/// file. Its contents load in the background.
	pub async fn open(store: Arc<dyn FileStore>, settings: &AutosaveSettings) -> Result<Self, SessionError> {
		let classifier = settings.classifier();
		let config = store.project_config().await.map_err(|failure| SessionError::Open(classifier.classify(&failure)))?;
		let listing = store.list().await.map_err(|failure| SessionError::Open(classifier.classify(&failure)))?;
		let files = FileSet::from_listing(listing);
		tracing::info!(project = %config.project_id, files = files.len(), "autosave.open");

		let session = Self {
			inner: Arc::new(SessionInner {
				store,
				queue: SerialQueue::new(format!("autosave:{}", config.project_id)),
				config: Arc::new(config),
				classifier,
				backoff: Backoff::new(settings.backoff_policy()),
				state: Mutex::new(SessionState {
					files,
					notices: NoticeCenter::new(),
					saving: None,
				}),
			}),
		};
		session.inner.reselect_first();
		Ok(session)
	}

	/// Replaces the active file's contents.
	pub fn edit(&self, contents: impl Into<String>) -> Result<EditOutcome, SessionError> {
		let active = self.active().ok_or(SessionError::NoActiveFile)?;
		self.edit_file(&active, contents)
	}

	/// Replaces `path`'s contents; the clean-to-dirty edge arms a sweep.
	pub fn edit_file(&self, path: &str, contents: impl Into<String>) -> Result<EditOutcome, SessionError> {
		let outcome = self.inner.state.lock().files.edit(path, contents);
		self.after_touch(path, outcome)
	}

	/// Flags `path` for saving without changing its contents. A file whose
	/// contents were never fetched is loaded first; it is not saved until then.
	pub fn mark_dirty(&self, path: &str) -> Result<EditOutcome, SessionError> {
		let (outcome, needs_load) = {
			let mut state = self.inner.state.lock();
			let outcome = state.files.mark_dirty(path);
			(outcome, state.files.get(path).is_some_and(|record| !record.is_loaded()))
		};
		if needs_load {
			self.inner.queue.enqueue(self.inner.load_task(path.to_string()));
		}
		self.after_touch(path, outcome)
	}

	fn after_touch(&self, path: &str, outcome: Option<EditOutcome>) -> Result<EditOutcome, SessionError> {
		let outcome = outcome.ok_or_else(|| SessionError::UnknownFile(path.to_string()))?;
		tracing::trace!(path = %path, ?outcome, "autosave.edit");
		if outcome == EditOutcome::BecameDirty {
			self.inner.arm_sweep();
		}
		Ok(outcome)
	}

	/// Makes `path` active, saving the previously active file first if it is
	/// dirty and fetching `path` if its contents were never loaded.
	pub fn select(&self, path: &str) -> Result<(), SessionError> {
		self.inner.select(path)
	}

	/// Creates an empty file (or selects it if it already exists) and returns
	/// its normalized path.
	pub fn insert(&self, path: &str) -> Result<String, SessionError> {
		let normalized = normalize_path(path).ok_or_else(|| SessionError::InvalidPath(path.to_string()))?;
		let created = self.inner.state.lock().files.insert(&normalized, "", SaveState::Dirty);
		if created {
			tracing::debug!(path = %normalized, "autosave.insert");
			self.inner.queue.enqueue(self.inner.save_task(normalized.clone()));
		}
		self.inner.select(&normalized)?;
		Ok(normalized)
	}

	/// Deletes `path` remotely; the record goes away once the store confirms.
	pub fn delete(&self, path: &str) -> Result<(), SessionError> {
		if !self.inner.state.lock().files.contains(path) {
			return Err(SessionError::UnknownFile(path.to_string()));
		}
		let inner = Arc::clone(&self.inner);
		let path = path.to_string();
		self.inner.queue.enqueue(Task::future(format!("delete:{path}"), async move {
			match inner.store.delete(&path).await {
				Ok(()) => {
					let was_active = {
						let mut state = inner.state.lock();
						let was_active = state.files.active() == Some(path.as_str());
						state.files.remove(&path);
						was_active
					};
					tracing::debug!(path = %path, was_active, "autosave.deleted");
					if was_active {
						inner.reselect_first();
					}
				}
				Err(failure) => inner.report(&format!("Failed to delete {path}"), &inner.classifier.classify(&failure)),
			}
			Ok(())
		}));
		Ok(())
	}

	/// Moves `path` to `new_path`. Returns `Ok(false)` when `new_path` is
	/// empty or names the same file.
	pub fn rename(&self, path: &str, new_path: &str) -> Result<bool, SessionError> {
		let Some(to) = normalize_path(new_path) else {
			return Ok(false);
		};
		if to == path {
			return Ok(false);
		}
		{
			let state = self.inner.state.lock();
			if !state.files.contains(path) {
				return Err(SessionError::UnknownFile(path.to_string()));
			}
			if state.files.contains(&to) {
				return Err(SessionError::PathExists(to));
			}
		}

		let inner = Arc::clone(&self.inner);
		let from = path.to_string();
		self.inner.queue.enqueue(Task::future(format!("rename:{from}"), async move {
			match inner.store.rename(&from, &to).await {
				Ok(()) => {
					let (dirty, active) = {
						let mut state = inner.state.lock();
						state.files.rename(&from, &to);
						let dirty = state.files.get(&to).is_some_and(|record| record.state() == SaveState::Dirty);
						(dirty, state.files.active() == Some(to.as_str()))
					};
					tracing::debug!(from = %from, to = %to, dirty, active, "autosave.renamed");
					// A sweep aimed at the old name finds nothing to save.
					if dirty {
						inner.arm_sweep();
					}
					if active && let Err(err) = inner.select(&to) {
						tracing::warn!(path = %to, error = %err, "autosave.reselect_failed");
					}
				}
				Err(failure) => inner.report(&format!("Failed to rename {from} to {to}"), &inner.classifier.classify(&failure)),
			}
			Ok(())
		}));
		Ok(true)
	}

	/// Saves every unsaved file, rejected ones included, and waits for the
	/// queue to drain. Fails with the paths that are still unsaved.
	pub async fn flush(&self) -> Result<(), SessionError> {
		let dirty: Vec<(String, bool)> = {
			let state = self.inner.state.lock();
			state
				.files
				.records()
				.filter(|record| record.is_dirty())
				.map(|record| (record.name().to_string(), record.is_loaded()))
				.collect()
		};
		tracing::debug!(files = dirty.len(), "autosave.flush");
		let attempted = dirty.len();
		for (path, loaded) in dirty {
			if !loaded {
				self.inner.queue.enqueue(self.inner.load_task(path.clone()));
			}
			self.inner.queue.enqueue(self.inner.save_task(path));
		}
		self.inner.queue.idle().await;

		let mut state = self.inner.state.lock();
		let remaining = state.files.dirty_paths();
		if !remaining.is_empty() {
			return Err(SessionError::Unsaved(remaining));
		}
		if attempted > 0 {
			state.notices.push(Notice::info(format!("Saved {attempted} file(s)")));
		}
		Ok(())
	}

	/// Flushes, then returns where the project is served.
	pub async fn run_url(&self) -> Result<Option<String>, SessionError> {
		self.flush().await?;
		Ok(self.inner.config.project_run_url.clone())
	}

	pub fn has_unsaved(&self) -> bool {
		let state = self.inner.state.lock();
		state.saving.is_some() || state.files.has_dirty()
	}

	pub fn status(&self) -> String {
		self.inner.state.lock().notices.status().to_string()
	}

	pub fn take_notices(&self) -> Vec<Notice> {
		self.inner.state.lock().notices.take_pending()
	}

	pub fn active(&self) -> Option<String> {
		self.inner.state.lock().files.active().map(str::to_string)
	}

	pub fn file(&self, path: &str) -> Option<FileRecord> {
		self.inner.state.lock().files.get(path).cloned()
	}

	pub fn files(&self) -> Vec<FileRecord> {
		self.inner.state.lock().files.records().cloned().collect()
	}

	pub fn config(&self) -> Arc<ProjectConfig> {
		Arc::clone(&self.inner.config)
	}

	pub fn backoff(&self) -> &Backoff {
		&self.inner.backoff
	}

	pub fn queue(&self) -> &SerialQueue {
		&self.inner.queue
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("Session")
			.field("project", &self.inner.config.project_id)
			.field("files", &state.files.len())
			.field("active", &state.files.active())
			.field("saving", &state.saving)
			.finish_non_exhaustive()
	}
}
