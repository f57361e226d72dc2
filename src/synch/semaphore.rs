//! A counting, blocking semaphore, in the shape of the teacher's
//! `Semaphore::acquire(&self, time: Option<u64>) -> bool`, rebuilt on
//! `std::sync::{Mutex, Condvar}` since this crate runs hosted rather than
//! as kernel code and has no scheduler to block a task against.
//!
//! The engine thread uses one of these as its wakeup signal: every event
//! that gives the engine something to do (`Mux::feed`, a queued outbound
//! frame, an unthrottle) releases it once; the engine's own loop acquires
//! it with a deadline so it still wakes up periodically to expire timed-out
//! waiters even with no new work.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct SemaphoreState {
	count: isize,
}

pub struct Semaphore {
	state: Mutex<SemaphoreState>,
	condvar: Condvar,
}

impl Semaphore {
	pub const fn new(count: isize) -> Self {
		Self {
			state: Mutex::new(SemaphoreState { count }),
			condvar: Condvar::new(),
		}
	}

	/// Acquires a resource, blocking until one is available or `time`
	/// elapses. `None` blocks indefinitely.
	pub fn acquire(&self, time: Option<Duration>) -> bool {
		let deadline = time.map(|d| Instant::now() + d);
		let mut state = self.state.lock().unwrap();

		loop {
			if state.count > 0 {
				state.count -= 1;
				return true;
			}

			match deadline {
				None => {
					state = self.condvar.wait(state).unwrap();
				}
				Some(deadline) => {
					let now = Instant::now();
					if now >= deadline {
						return false;
					}
					let (guard, timeout) =
						self.condvar.wait_timeout(state, deadline - now).unwrap();
					state = guard;
					if timeout.timed_out() && state.count <= 0 {
						return false;
					}
				}
			}
		}
	}

	pub fn try_acquire(&self) -> bool {
		let mut state = self.state.lock().unwrap();
		if state.count > 0 {
			state.count -= 1;
			true
		} else {
			false
		}
	}

	/// Releases a resource, waking one waiter if any are blocked.
	pub fn release(&self) {
		let mut state = self.state.lock().unwrap();
		state.count += 1;
		self.condvar.notify_one();
	}
}
