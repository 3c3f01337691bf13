use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("quill-worker-global")
			.build()
			.expect("failed to build quill-worker global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async task on the current runtime.
///
/// Callers outside a tokio context (editor event callbacks, plain threads)
/// land on a small shared runtime instead of panicking.
pub fn spawn<F>(label: &'static str, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(task = label, "worker.spawn");
	runtime_handle().spawn(fut)
}
