//! Worker primitives for the autosave engine.
//!
//! * [`SerialQueue`] runs tasks one at a time, in submission order, and keeps
//!   draining when a task fails.
//! * [`Backoff`] tracks an exponential retry delay and arms at most one timer.
//! * [`spawn`] attaches futures to the ambient tokio runtime.

mod backoff;
mod panic;
mod serial_queue;
mod spawn;

pub use backoff::{Backoff, BackoffPolicy, delay_millis};
pub use panic::{join_error_panic_message, panic_payload_message};
pub use serial_queue::{FaultHandler, QueueError, SerialQueue, Step, StepFuture, Task, TaskFault};
pub use spawn::spawn;
