//! In-memory project file set with per-file dirty tracking.

use std::collections::BTreeMap;

use crate::store::{FetchedFile, RemoteFile, normalize_mime};

/// Persistence state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
	/// Contents match the last confirmed save (or were never edited).
	Clean,
	/// Edited since the last confirmed save; autosave will pick it up.
	Dirty,
	/// The last save was refused by the backend. Still unsaved, but only the
	/// next edit or an explicit flush will try again.
	Rejected,
}

/// Result of applying an edit to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
	/// The file was clean (or rejected) and now awaits a save.
	BecameDirty,
	/// The file was already waiting for a save.
	AlreadyDirty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
	name: String,
	mime_type: String,
	contents: Option<String>,
	state: SaveState,
}

impl FileRecord {
	/// A listed file whose contents have not been fetched yet.
	pub fn listed(name: impl Into<String>, mime_type: Option<&str>) -> Self {
		Self {
			name: name.into(),
			mime_type: normalize_mime(mime_type),
			contents: None,
			state: SaveState::Clean,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn mime_type(&self) -> &str {
		&self.mime_type
	}

	pub fn contents(&self) -> Option<&str> {
		self.contents.as_deref()
	}

	pub fn state(&self) -> SaveState {
		self.state
	}

	pub fn is_dirty(&self) -> bool {
		self.state != SaveState::Clean
	}

	pub fn is_loaded(&self) -> bool {
		self.contents.is_some()
	}

	fn touch(&mut self) -> EditOutcome {
		let outcome = if self.state == SaveState::Dirty {
			EditOutcome::AlreadyDirty
		} else {
			EditOutcome::BecameDirty
		};
		self.state = SaveState::Dirty;
		outcome
	}
}

/// Strips a leading `/`; returns `None` for empty names.
pub fn normalize_path(path: &str) -> Option<String> {
	let trimmed = path.trim();
	let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
	if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

/// Authoritative set of project files, ordered by name.
#[derive(Debug, Default, Clone)]
pub struct FileSet {
	files: BTreeMap<String, FileRecord>,
	active: Option<String>,
}

impl FileSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_listing(listing: impl IntoIterator<Item = RemoteFile>) -> Self {
		let files = listing
			.into_iter()
			.map(|remote| (remote.name.clone(), FileRecord::listed(remote.name, remote.mime_type.as_deref())))
			.collect();
		Self { files, active: None }
	}

	pub fn len(&self) -> usize {
		self.files.len()
	}

	pub fn is_empty(&self) -> bool {
		self.files.is_empty()
	}

	pub fn contains(&self, path: &str) -> bool {
		self.files.contains_key(path)
	}

	pub fn get(&self, path: &str) -> Option<&FileRecord> {
		self.files.get(path)
	}

	pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
		self.files.values()
	}

	pub fn paths(&self) -> Vec<String> {
		self.files.keys().cloned().collect()
	}

	pub fn first_path(&self) -> Option<&str> {
		self.files.keys().next().map(String::as_str)
	}

	pub fn active(&self) -> Option<&str> {
		self.active.as_deref()
	}

	/// Makes `path` the active file; false if it is not tracked.
	pub fn set_active(&mut self, path: &str) -> bool {
		if !self.files.contains_key(path) {
			return false;
		}
		self.active = Some(path.to_string());
		true
	}

	/// Adds a new, loaded file; false if the path already exists.
	pub fn insert(&mut self, path: &str, contents: impl Into<String>, state: SaveState) -> bool {
		if self.files.contains_key(path) {
			return false;
		}
		self.files.insert(
			path.to_string(),
			FileRecord {
				name: path.to_string(),
				mime_type: normalize_mime(None),
				contents: Some(contents.into()),
				state,
			},
		);
		true
	}

	/// Drops a file, clearing the active selection if it pointed there.
	pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
		let removed = self.files.remove(path)?;
		if self.active.as_deref() == Some(path) {
			self.active = None;
		}
		Some(removed)
	}

	/// Moves a record to a new name, keeping contents and save state.
	pub fn rename(&mut self, from: &str, to: &str) -> bool {
		if self.files.contains_key(to) {
			return false;
		}
		let Some(mut record) = self.files.remove(from) else {
			return false;
		};
		record.name = to.to_string();
		self.files.insert(to.to_string(), record);
		if self.active.as_deref() == Some(from) {
			self.active = Some(to.to_string());
		}
		true
	}

	/// Replaces a file's contents from an edit.
	pub fn edit(&mut self, path: &str, contents: impl Into<String>) -> Option<EditOutcome> {
		let record = self.files.get_mut(path)?;
		record.contents = Some(contents.into());
		Some(record.touch())
	}

	/// Flags a file as needing a save without changing its contents.
	pub fn mark_dirty(&mut self, path: &str) -> Option<EditOutcome> {
		self.files.get_mut(path).map(FileRecord::touch)
	}

	/// Stores fetched contents unless the file was loaded (or edited) meanwhile.
	pub fn load(&mut self, path: &str, fetched: FetchedFile) -> bool {
		let Some(record) = self.files.get_mut(path) else {
			return false;
		};
		if record.contents.is_some() {
			return false;
		}
		record.mime_type = normalize_mime(fetched.content_type.as_deref());
		record.contents = Some(fetched.contents);
		true
	}

	/// Optimistically marks a dirty file clean and returns the bytes to send.
	///
	/// Returns `None` when the file is gone, has nothing to save, or was never
	/// loaded. Unloaded contents are unknown, not empty, so they stay dirty.
	pub fn begin_save(&mut self, path: &str) -> Option<String> {
		let record = self.files.get_mut(path)?;
		if !record.is_dirty() {
			return None;
		}
		let contents = record.contents.clone()?;
		record.state = SaveState::Clean;
		Some(contents)
	}

	/// Re-marks a file after a failed save.
	pub fn save_failed(&mut self, path: &str, retryable: bool) {
		if let Some(record) = self.files.get_mut(path) {
			record.state = match (record.state, retryable) {
				// An edit landed while the save was in flight; autosave already owns it.
				(SaveState::Dirty, _) | (_, true) => SaveState::Dirty,
				(_, false) => SaveState::Rejected,
			};
		}
	}

	/// First loaded file autosave should write, in name order.
	pub fn next_to_save(&self) -> Option<&str> {
		self.files
			.values()
			.find(|record| record.state == SaveState::Dirty && record.is_loaded())
			.map(FileRecord::name)
	}

	/// Every unsaved file, rejected ones included.
	pub fn dirty_paths(&self) -> Vec<String> {
		self.files.values().filter(|record| record.is_dirty()).map(|record| record.name.clone()).collect()
	}

	pub fn has_dirty(&self) -> bool {
		self.files.values().any(FileRecord::is_dirty)
	}
}
