//! Strict FIFO task runner.
//!
//! A [`SerialQueue`] executes at most one task at a time. Synchronous task
//! bodies run to completion on the caller's stack; a task that returns
//! [`Step::Pending`] parks the queue until its future settles, after which
//! draining resumes on the worker runtime.
//!
//! Failures (an `Err` from the task, a panic, or an error/panic from the
//! pending future) go to the queue's [`FaultHandler`]. They never reach later
//! tasks and never stop the queue.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

use crate::panic::{join_error_panic_message, panic_payload_message};

#[cfg(test)]
mod tests;

/// Boxed future driving one pending step.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<(), TaskFault>> + Send + 'static>>;

/// Receives `(task label, fault)` for every failed task.
pub type FaultHandler = Arc<dyn Fn(&str, &TaskFault) + Send + Sync>;

/// Result of invoking a task body.
pub enum Step {
	/// The task finished synchronously.
	Ready,
	/// The task suspended; the queue waits for this future before moving on.
	Pending(StepFuture),
}

impl Step {
	/// Wraps a fallible future as a pending step.
	pub fn pending<F>(fut: F) -> Self
	where
		F: Future<Output = Result<(), TaskFault>> + Send + 'static,
	{
		Self::Pending(Box::pin(fut))
	}

	/// Wraps an infallible future as a pending step.
	pub fn wait<F>(fut: F) -> Self
	where
		F: Future<Output = ()> + Send + 'static,
	{
		Self::pending(async move {
			fut.await;
			Ok(())
		})
	}
}

impl fmt::Debug for Step {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Ready => f.write_str("Ready"),
			Self::Pending(_) => f.write_str("Pending(..)"),
		}
	}
}

/// Failure raised by a queued task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFault {
	/// The task (or its pending future) returned an error.
	#[error("{0}")]
	Failed(String),
	/// The task (or its pending future) panicked.
	#[error("panicked: {0}")]
	Panicked(String),
	/// The pending future was aborted before it settled.
	#[error("cancelled before settling")]
	Cancelled,
}

impl TaskFault {
	pub fn failed(message: impl Into<String>) -> Self {
		Self::Failed(message.into())
	}

	fn from_join_error(err: tokio::task::JoinError) -> Self {
		match join_error_panic_message(err) {
			Some(msg) => Self::Panicked(msg),
			None => Self::Cancelled,
		}
	}
}

/// Contract violations when submitting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
	/// No task was supplied.
	#[error("serial queue requires a task, got none")]
	InvalidTask,
}

/// One unit of work owned by the queue until it completes.
pub struct Task {
	label: Cow<'static, str>,
	run: Box<dyn FnOnce() -> Result<Step, TaskFault> + Send + 'static>,
}

impl Task {
	/// Creates a task from a body that may finish synchronously or suspend.
	pub fn new(label: impl Into<Cow<'static, str>>, run: impl FnOnce() -> Result<Step, TaskFault> + Send + 'static) -> Self {
		Self {
			label: label.into(),
			run: Box::new(run),
		}
	}

	/// Creates a task whose body always completes synchronously.
	pub fn sync(label: impl Into<Cow<'static, str>>, f: impl FnOnce() + Send + 'static) -> Self {
		Self::new(label, move || {
			f();
			Ok(Step::Ready)
		})
	}

	/// Creates a task that suspends on `fut`.
	///
	/// The future is not polled until the queue reaches this task.
	pub fn future<F>(label: impl Into<Cow<'static, str>>, fut: F) -> Self
	where
		F: Future<Output = Result<(), TaskFault>> + Send + 'static,
	{
		Self::new(label, move || Ok(Step::pending(fut)))
	}

	pub fn label(&self) -> &str {
		&self.label
	}
}

impl fmt::Debug for Task {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Task").field("label", &self.label).finish_non_exhaustive()
	}
}

struct QueueState {
	pending: VecDeque<Task>,
	/// Set while a task body runs or its pending step is unsettled.
	in_flight: bool,
}

struct QueueInner {
	name: Cow<'static, str>,
	state: Mutex<QueueState>,
	on_fault: FaultHandler,
	idle: Notify,
}

impl QueueInner {
	fn report(&self, label: &str, fault: &TaskFault) {
		tracing::debug!(queue = %self.name, task = label, error = %fault, "serial_queue.fault");
		(self.on_fault)(label, fault);
	}

	fn suspend(self: &Arc<Self>, label: Cow<'static, str>, fut: StepFuture) {
		tracing::trace!(queue = %self.name, task = %label, "serial_queue.suspend");
		let step = crate::spawn("serial_queue.step", fut);
		let inner = Arc::clone(self);
		crate::spawn("serial_queue.settle", async move {
			let settled = match step.await {
				Ok(result) => result,
				Err(err) => Err(TaskFault::from_join_error(err)),
			};
			if let Err(fault) = settled {
				inner.report(&label, &fault);
			}
			tracing::trace!(queue = %inner.name, task = %label, "serial_queue.settled");
			inner.state.lock().in_flight = false;
			drain(&inner);
		});
	}
}

/// Runs queued tasks until one suspends or the queue empties.
fn drain(inner: &Arc<QueueInner>) {
	loop {
		let Task { label, run } = {
			let mut state = inner.state.lock();
			if state.in_flight {
				return;
			}
			match state.pending.pop_front() {
				Some(task) => {
					state.in_flight = true;
					task
				}
				None => {
					drop(state);
					inner.idle.notify_waiters();
					return;
				}
			}
		};

		match std::panic::catch_unwind(AssertUnwindSafe(run)) {
			Ok(Ok(Step::Ready)) => {}
			Ok(Ok(Step::Pending(fut))) => {
				inner.suspend(label, fut);
				return;
			}
			Ok(Err(fault)) => inner.report(&label, &fault),
			Err(payload) => inner.report(&label, &TaskFault::Panicked(panic_payload_message(payload.as_ref()))),
		}
		inner.state.lock().in_flight = false;
	}
}

/// FIFO runner guaranteeing that no two tasks overlap.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct SerialQueue {
	inner: Arc<QueueInner>,
}

impl SerialQueue {
	/// Creates a queue whose faults are logged at error level.
	pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
		Self::with_fault_handler(
			name,
			Arc::new(|label: &str, fault: &TaskFault| {
				tracing::error!(task = label, error = %fault, "serial queue task failed");
			}),
		)
	}

	/// Creates a queue that routes task faults to `on_fault`.
	pub fn with_fault_handler(name: impl Into<Cow<'static, str>>, on_fault: FaultHandler) -> Self {
		Self {
			inner: Arc::new(QueueInner {
				name: name.into(),
				state: Mutex::new(QueueState {
					pending: VecDeque::new(),
					in_flight: false,
				}),
				on_fault,
				idle: Notify::new(),
			}),
		}
	}

	/// Appends `task` and starts draining if nothing is in flight.
	///
	/// Returns without waiting for `task`. Tasks enqueued from inside a
	/// running task are appended, never run re-entrantly.
	pub fn enqueue(&self, task: Task) -> &Self {
		{
			let mut state = self.inner.state.lock();
			tracing::trace!(
				queue = %self.inner.name,
				task = task.label(),
				pending = state.pending.len(),
				in_flight = state.in_flight,
				"serial_queue.enqueue"
			);
			state.pending.push_back(task);
		}
		drain(&self.inner);
		self
	}

	/// Like [`Self::enqueue`], for callers holding an optional task.
	pub fn try_enqueue(&self, task: Option<Task>) -> Result<&Self, QueueError> {
		let task = task.ok_or(QueueError::InvalidTask)?;
		Ok(self.enqueue(task))
	}

	/// Defers every later task by at least one scheduler turn.
	pub fn tick(&self) -> &Self {
		self.enqueue(Task::future("tick", async {
			tokio::task::yield_now().await;
			Ok(())
		}))
	}

	/// Waits until the queue is empty and nothing is in flight.
	pub async fn idle(&self) {
		loop {
			let notified = self.inner.idle.notified();
			if !self.is_busy() {
				return;
			}
			notified.await;
		}
	}

	/// Returns true while a task is in flight or waiting.
	pub fn is_busy(&self) -> bool {
		let state = self.inner.state.lock();
		state.in_flight || !state.pending.is_empty()
	}

	/// Number of tasks waiting behind the in-flight one.
	pub fn pending_len(&self) -> usize {
		self.inner.state.lock().pending.len()
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}
}

impl fmt::Debug for SerialQueue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("SerialQueue")
			.field("name", &self.inner.name)
			.field("pending", &state.pending.len())
			.field("in_flight", &state.in_flight)
			.finish()
	}
}
