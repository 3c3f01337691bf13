//! Scriptable in-memory [`FileStore`].
//!
//! Backs the simulator and the integration tests. Every call is recorded,
//! failures can be queued per operation, and an optional latency makes
//! overlapping requests observable through [`MemoryStore::max_concurrent`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::classify::{Failure, Response};
use crate::store::{FetchedFile, FileStore, ProjectConfig, RemoteFile};

/// Operation kinds, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
	Config,
	List,
	Get,
	Put,
	Delete,
	Rename,
}

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
	ProjectConfig,
	List,
	Get(String),
	Put(String, String),
	Delete(String),
	Rename(String, String),
}

impl StoreCall {
	pub fn op(&self) -> StoreOp {
		match self {
			Self::ProjectConfig => StoreOp::Config,
			Self::List => StoreOp::List,
			Self::Get(_) => StoreOp::Get,
			Self::Put(..) => StoreOp::Put,
			Self::Delete(_) => StoreOp::Delete,
			Self::Rename(..) => StoreOp::Rename,
		}
	}
}

#[derive(Debug, Clone)]
struct StoredFile {
	contents: String,
	content_type: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
	files: BTreeMap<String, StoredFile>,
	calls: Vec<StoreCall>,
	failures: Vec<(StoreOp, Failure)>,
}

#[derive(Debug)]
pub struct MemoryStore {
	config: ProjectConfig,
	latency: Duration,
	state: Mutex<MemoryState>,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
}

impl MemoryStore {
	pub fn new(config: ProjectConfig) -> Self {
		Self {
			config,
			latency: Duration::ZERO,
			state: Mutex::new(MemoryState::default()),
			in_flight: AtomicUsize::new(0),
			max_in_flight: AtomicUsize::new(0),
		}
	}

	#[must_use]
	pub fn with_file(self, path: impl Into<String>, contents: impl Into<String>, content_type: Option<&str>) -> Self {
		self.state.lock().files.insert(
			path.into(),
			StoredFile {
				contents: contents.into(),
				content_type: content_type.map(str::to_string),
			},
		);
		self
	}

	#[must_use]
	pub fn with_latency(mut self, latency: Duration) -> Self {
		self.latency = latency;
		self
	}

	/// Makes the next call of `op` fail with `failure`. Queued failures for the
	/// same op are consumed in order.
	pub fn fail_next(&self, op: StoreOp, failure: Failure) {
		self.state.lock().failures.push((op, failure));
	}

	/// Queues a plain error response with `status` for the next call of `op`.
	pub fn fail_next_with_status(&self, op: StoreOp, status: u16) {
		self.fail_next(op, Failure::Response(Response::new(op_method(op), "/memory", status).with_body("injected failure")));
	}

	pub fn calls(&self) -> Vec<StoreCall> {
		self.state.lock().calls.clone()
	}

	pub fn count(&self, op: StoreOp) -> usize {
		self.state.lock().calls.iter().filter(|call| call.op() == op).count()
	}

	pub fn contents(&self, path: &str) -> Option<String> {
		self.state.lock().files.get(path).map(|file| file.contents.clone())
	}

	pub fn paths(&self) -> Vec<String> {
		self.state.lock().files.keys().cloned().collect()
	}

	/// Highest number of requests observed in flight at once.
	pub fn max_concurrent(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}

	/// Records the call and pops a queued failure for it, if any.
	fn begin(&self, call: StoreCall) -> Result<(), Failure> {
		let op = call.op();
		let mut state = self.state.lock();
		tracing::debug!(?call, "memory_store.call");
		state.calls.push(call);
		match state.failures.iter().position(|(target, _)| *target == op) {
			Some(index) => Err(state.failures.remove(index).1),
			None => Ok(()),
		}
	}

	async fn request<T>(&self, call: StoreCall, apply: impl FnOnce(&mut MemoryState) -> Result<T, Failure>) -> Result<T, Failure> {
		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(now, Ordering::SeqCst);
		let injected = self.begin(call);
		if !self.latency.is_zero() {
			tokio::time::sleep(self.latency).await;
		}
		let result = injected.and_then(|()| apply(&mut *self.state.lock()));
		self.in_flight.fetch_sub(1, Ordering::SeqCst);
		result
	}
}

fn op_method(op: StoreOp) -> &'static str {
	match op {
		StoreOp::Config | StoreOp::List | StoreOp::Get => "GET",
		StoreOp::Put | StoreOp::Rename => "PUT",
		StoreOp::Delete => "DELETE",
	}
}

fn not_found(method: &str, path: &str) -> Failure {
	Failure::Response(Response::new(method, format!("/{path}"), 404).with_body(format!("{path} not found")))
}

#[async_trait]
impl FileStore for MemoryStore {
	async fn project_config(&self) -> Result<ProjectConfig, Failure> {
		// Served as JSON, the way the backend delivers it.
		let payload = serde_json::to_string(&self.config).map_err(|err| Failure::fault(err.to_string()))?;
		self.request(StoreCall::ProjectConfig, move |_| {
			ProjectConfig::from_json(&payload).map_err(|err| Failure::fault(format!("malformed project config: {err}")))
		})
		.await
	}

	async fn list(&self) -> Result<Vec<RemoteFile>, Failure> {
		self.request(StoreCall::List, |state| {
			Ok(state
				.files
				.iter()
				.map(|(name, file)| RemoteFile {
					name: name.clone(),
					mime_type: file.content_type.clone(),
				})
				.collect())
		})
		.await
	}

	async fn get(&self, path: &str) -> Result<FetchedFile, Failure> {
		self.request(StoreCall::Get(path.to_string()), |state| {
			let file = state.files.get(path).ok_or_else(|| not_found("GET", path))?;
			Ok(FetchedFile {
				contents: file.contents.clone(),
				content_type: file.content_type.clone(),
			})
		})
		.await
	}

	async fn put(&self, path: &str, contents: &str) -> Result<(), Failure> {
		self.request(StoreCall::Put(path.to_string(), contents.to_string()), |state| {
			let content_type = state.files.get(path).and_then(|file| file.content_type.clone());
			state.files.insert(
				path.to_string(),
				StoredFile {
					contents: contents.to_string(),
					content_type,
				},
			);
			Ok(())
		})
		.await
	}

	async fn delete(&self, path: &str) -> Result<(), Failure> {
		self.request(StoreCall::Delete(path.to_string()), |state| {
			state.files.remove(path).map(|_| ()).ok_or_else(|| not_found("DELETE", path))
		})
		.await
	}

	async fn rename(&self, path: &str, new_path: &str) -> Result<(), Failure> {
		self.request(StoreCall::Rename(path.to_string(), new_path.to_string()), |state| {
			let file = state.files.remove(path).ok_or_else(|| not_found("PUT", path))?;
			state.files.insert(new_path.to_string(), file);
			Ok(())
		})
		.await
	}
}
