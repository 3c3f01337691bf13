//! Exponential retry delay with a single armed timer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Delay bounds for a [`Backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
	initial: Duration,
	max: Duration,
}

impl BackoffPolicy {
	/// Creates a policy; `max` is raised to `initial` if it is smaller.
	pub fn new(initial: Duration, max: Duration) -> Self {
		Self {
			initial,
			max: max.max(initial),
		}
	}

	pub const fn initial(&self) -> Duration {
		self.initial
	}

	pub const fn max(&self) -> Duration {
		self.max
	}
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self::new(Duration::from_secs(1), Duration::from_secs(120))
	}
}

#[derive(Debug)]
struct BackoffState {
	delay: Duration,
	armed: bool,
}

/// Escalating retry delay plus at most one pending callback.
///
/// [`Self::schedule_once`] while a timer is armed is a no-op, so bursts of
/// near-simultaneous failures collapse into one retry. An armed timer cannot
/// be cancelled. Clones share state.
#[derive(Debug, Clone)]
pub struct Backoff {
	policy: BackoffPolicy,
	state: Arc<Mutex<BackoffState>>,
}

impl Default for Backoff {
	fn default() -> Self {
		Self::new(BackoffPolicy::default())
	}
}

impl Backoff {
	pub fn new(policy: BackoffPolicy) -> Self {
		Self {
			policy,
			state: Arc::new(Mutex::new(BackoffState {
				delay: policy.initial,
				armed: false,
			})),
		}
	}

	pub fn policy(&self) -> BackoffPolicy {
		self.policy
	}

	/// Returns the delay to the initial value.
	pub fn reset(&self) {
		self.state.lock().delay = self.policy.initial;
	}

	/// Doubles the delay, clamped to the policy maximum, and returns it.
	pub fn next_delay(&self) -> Duration {
		let mut state = self.state.lock();
		state.delay = state.delay.saturating_mul(2).min(self.policy.max);
		state.delay
	}

	/// Current delay used by the next armed timer.
	pub fn current(&self) -> Duration {
		self.state.lock().delay
	}

	pub fn is_armed(&self) -> bool {
		self.state.lock().armed
	}

	/// Arms a timer for the current delay unless one is already armed.
	///
	/// The armed flag clears before `callback` runs, so the callback may arm
	/// the next retry itself. Returns whether a timer was armed.
	pub fn schedule_once<F>(&self, callback: F) -> bool
	where
		F: FnOnce() + Send + 'static,
	{
		let delay = {
			let mut state = self.state.lock();
			if state.armed {
				tracing::trace!("backoff.already_armed");
				return false;
			}
			state.armed = true;
			state.delay
		};

		tracing::trace!(delay_ms = delay_millis(delay), "backoff.arm");
		let state = Arc::clone(&self.state);
		crate::spawn("backoff.timer", async move {
			tokio::time::sleep(delay).await;
			state.lock().armed = false;
			callback();
		});
		true
	}
}

/// Whole milliseconds in `delay`, saturating at `u64::MAX`.
pub fn delay_millis(delay: Duration) -> u64 {
	u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use pretty_assertions::assert_eq;

	use super::*;

	fn ms(n: u64) -> Duration {
		Duration::from_millis(n)
	}

	#[test]
	fn delay_millis_saturates() {
		assert_eq!(delay_millis(ms(2500)), 2500);
		assert_eq!(delay_millis(Duration::MAX), u64::MAX);
	}

	#[test]
	fn next_delay_doubles_from_initial() {
		let backoff = Backoff::default();
		backoff.reset();
		let delays: Vec<_> = (0..3).map(|_| backoff.next_delay()).collect();
		assert_eq!(delays, vec![ms(2000), ms(4000), ms(8000)]);
	}

	#[test]
	fn next_delay_never_exceeds_cap() {
		let backoff = Backoff::default();
		let delays: Vec<_> = (0..20).map(|_| backoff.next_delay()).collect();
		assert!(delays.iter().all(|d| *d <= ms(120_000)));
		assert_eq!(delays.last().copied(), Some(ms(120_000)));
	}

	#[test]
	fn reset_restores_initial_delay() {
		let backoff = Backoff::new(BackoffPolicy::new(ms(250), ms(4000)));
		backoff.next_delay();
		backoff.next_delay();
		assert_eq!(backoff.current(), ms(1000));
		backoff.reset();
		assert_eq!(backoff.current(), ms(250));
	}

	#[test]
	fn policy_max_is_at_least_initial() {
		let policy = BackoffPolicy::new(ms(500), ms(100));
		assert_eq!(policy.max(), ms(500));
		let backoff = Backoff::new(policy);
		assert_eq!(backoff.next_delay(), ms(500));
	}

	#[tokio::test(flavor = "current_thread", start_paused = true)]
	async fn schedule_once_is_idempotent_while_armed() {
		let backoff = Backoff::default();
		let fired = Arc::new(AtomicUsize::new(0));

		let first = Arc::clone(&fired);
		assert!(backoff.schedule_once(move || {
			first.fetch_add(1, Ordering::SeqCst);
		}));
		let second = Arc::clone(&fired);
		assert!(!backoff.schedule_once(move || {
			second.fetch_add(1, Ordering::SeqCst);
		}));
		assert!(backoff.is_armed());

		tokio::time::sleep(ms(999)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 0);

		tokio::time::sleep(ms(10)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 1);
		assert!(!backoff.is_armed());

		tokio::time::sleep(ms(5000)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(flavor = "current_thread", start_paused = true)]
	async fn callback_can_rearm_with_escalated_delay() {
		let backoff = Backoff::default();
		let fired = Arc::new(AtomicUsize::new(0));

		let rearm = backoff.clone();
		let counter = Arc::clone(&fired);
		backoff.schedule_once(move || {
			counter.fetch_add(1, Ordering::SeqCst);
			assert_eq!(rearm.next_delay(), ms(2000));
			let counter = Arc::clone(&counter);
			assert!(rearm.schedule_once(move || {
				counter.fetch_add(1, Ordering::SeqCst);
			}));
		});

		tokio::time::sleep(ms(1010)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 1);
		assert!(backoff.is_armed());

		tokio::time::sleep(ms(1900)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 1);

		tokio::time::sleep(ms(200)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 2);
		assert!(!backoff.is_armed());
	}
}
