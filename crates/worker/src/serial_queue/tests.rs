use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;

type Log = Arc<Mutex<Vec<u32>>>;

fn log_task(log: &Log, value: u32) -> Task {
	let log = Arc::clone(log);
	Task::sync(format!("log-{value}"), move || log.lock().push(value))
}

fn delayed_log_task(log: &Log, value: u32, delay: Duration) -> Task {
	let log = Arc::clone(log);
	Task::future(format!("delayed-{value}"), async move {
		tokio::time::sleep(delay).await;
		log.lock().push(value);
		Ok(())
	})
}

fn recording_queue() -> (SerialQueue, Arc<Mutex<Vec<String>>>) {
	let faults = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&faults);
	let queue = SerialQueue::with_fault_handler(
		"test",
		Arc::new(move |_label: &str, fault: &TaskFault| sink.lock().push(fault.to_string())),
	);
	(queue, faults)
}

#[tokio::test]
async fn enqueue_and_tick_are_chainable() {
	let queue = SerialQueue::new("chain");
	let returned = queue.enqueue(Task::sync("noop", || {}));
	assert!(std::ptr::eq(returned, &queue));
	let returned = queue.tick();
	assert!(std::ptr::eq(returned, &queue));
	queue.idle().await;
}

#[test]
fn missing_task_is_rejected() {
	let queue = SerialQueue::new("reject");
	assert_eq!(queue.try_enqueue(None).err(), Some(QueueError::InvalidTask));
	assert!(!queue.is_busy());
}

#[test]
fn synchronous_task_runs_before_enqueue_returns() {
	let queue = SerialQueue::new("sync");
	let ran = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&ran);
	queue.enqueue(Task::sync("bump", move || {
		counter.fetch_add(1, Ordering::SeqCst);
	}));
	assert_eq!(ran.load(Ordering::SeqCst), 1);
	assert!(!queue.is_busy());
}

#[tokio::test]
async fn ticks_defer_later_tasks() {
	let queue = SerialQueue::new("ticks");
	let log: Log = Arc::default();

	queue.enqueue(log_task(&log, 1));
	queue.tick();
	queue.enqueue(log_task(&log, 2)).enqueue(log_task(&log, 3)).tick().enqueue(log_task(&log, 4));
	queue.tick();

	assert_eq!(*log.lock(), vec![1]);
	queue.idle().await;
	assert_eq!(*log.lock(), vec![1, 2, 3, 4]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn pending_step_holds_back_followers() {
	let queue = SerialQueue::new("pending");
	let log: Log = Arc::default();

	queue.enqueue(delayed_log_task(&log, 1, Duration::from_millis(50))).enqueue(log_task(&log, 2));

	assert!(log.lock().is_empty());
	assert_eq!(queue.pending_len(), 1);
	queue.idle().await;
	assert_eq!(*log.lock(), vec![1, 2]);
}

#[test]
fn synchronous_failure_is_reported_and_queue_continues() {
	let (queue, faults) = recording_queue();
	let log: Log = Arc::default();

	queue
		.enqueue(log_task(&log, 1))
		.enqueue(Task::new("peel", || Err(TaskFault::failed("banana peel"))))
		.enqueue(log_task(&log, 2));

	assert_eq!(*faults.lock(), vec!["banana peel".to_string()]);
	assert_eq!(*log.lock(), vec![1, 2]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failure_inside_pending_step_is_isolated() {
	let (queue, faults) = recording_queue();
	let log: Log = Arc::default();

	queue
		.enqueue(log_task(&log, 1))
		.enqueue(delayed_log_task(&log, 2, Duration::from_millis(10)))
		.enqueue(Task::future("core", async {
			tokio::time::sleep(Duration::from_millis(10)).await;
			Err(TaskFault::failed("apple core"))
		}))
		.enqueue(log_task(&log, 3));

	queue.idle().await;
	assert_eq!(*faults.lock(), vec!["apple core".to_string()]);
	assert_eq!(*log.lock(), vec![1, 2, 3]);
}

async fn explode() -> Result<(), TaskFault> {
	panic!("async boom")
}

#[tokio::test]
async fn panics_become_faults() {
	let (queue, faults) = recording_queue();
	let log: Log = Arc::default();

	queue
		.enqueue(Task::sync("sync-panic", || panic!("sync boom")))
		.enqueue(Task::future("async-panic", explode()))
		.enqueue(log_task(&log, 7));

	queue.idle().await;
	assert_eq!(
		*faults.lock(),
		vec!["panicked: sync boom".to_string(), "panicked: async boom".to_string()]
	);
	assert_eq!(*log.lock(), vec![7]);
}

#[test]
fn nested_enqueue_appends_instead_of_recursing() {
	let queue = SerialQueue::new("nested");
	let order = Arc::new(Mutex::new(Vec::new()));

	let handle = queue.clone();
	let outer = Arc::clone(&order);
	queue.enqueue(Task::sync("outer", move || {
		let inner = Arc::clone(&outer);
		handle.enqueue(Task::sync("inner", move || inner.lock().push("inner")));
		outer.lock().push("outer-end");
	}));

	assert_eq!(*order.lock(), vec!["outer-end", "inner"]);
}

#[tokio::test]
async fn idle_returns_immediately_for_empty_queue() {
	let queue = SerialQueue::new("empty");
	tokio::time::timeout(Duration::from_millis(50), queue.idle())
		.await
		.expect("empty queue should already be idle");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	Start,
	End,
}

proptest! {
	#[test]
	fn bodies_never_overlap_and_finish_in_order(steps in prop::collection::vec(prop::option::of(0u64..25), 1..24)) {
		let rt = tokio::runtime::Builder::new_current_thread()
			.enable_time()
			.start_paused(true)
			.build()
			.expect("test runtime");

		let (events, max_active) = rt.block_on(async {
			let queue = SerialQueue::new("prop");
			let events = Arc::new(Mutex::new(Vec::new()));
			let active = Arc::new(AtomicUsize::new(0));
			let max_active = Arc::new(AtomicUsize::new(0));

			for (idx, step) in steps.iter().copied().enumerate() {
				let events = Arc::clone(&events);
				let active = Arc::clone(&active);
				let max_active = Arc::clone(&max_active);
				queue.enqueue(Task::new(format!("step-{idx}"), move || {
					let now = active.fetch_add(1, Ordering::SeqCst) + 1;
					max_active.fetch_max(now, Ordering::SeqCst);
					events.lock().push((idx, Phase::Start));
					let Some(ms) = step else {
						events.lock().push((idx, Phase::End));
						active.fetch_sub(1, Ordering::SeqCst);
						return Ok(Step::Ready);
					};
					Ok(Step::wait(async move {
						tokio::time::sleep(Duration::from_millis(ms)).await;
						events.lock().push((idx, Phase::End));
						active.fetch_sub(1, Ordering::SeqCst);
					}))
				}));
			}

			queue.idle().await;
			let events = events.lock().clone();
			(events, max_active.load(Ordering::SeqCst))
		});

		let expected: Vec<_> = (0..steps.len()).flat_map(|idx| [(idx, Phase::Start), (idx, Phase::End)]).collect();
		prop_assert_eq!(events, expected);
		prop_assert_eq!(max_active, 1);
	}
}
