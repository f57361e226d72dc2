//! Deadline-bounded wait queue used for the per-DLCI `open_wait`/
//! `close_wait` queues and the connection-wide test waiter (§5, §9).
//!
//! The original driver sleeps a task on a condition variable and wakes it
//! either on the matching state transition or on a signal; here a consumer
//! calls [`Waiter::wait_while`] with a predicate describing what it's
//! waiting for and a deadline, and any state-machine transition that could
//! satisfy a waiter calls [`Waiter::notify_all`] atomically with the write
//! that changed the state.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct Waiter {
	gate: Mutex<()>,
	condvar: Condvar,
}

impl Waiter {
	pub const fn new() -> Self {
		Self {
			gate: Mutex::new(()),
			condvar: Condvar::new(),
		}
	}

	/// Blocks until `done` returns `true` or `timeout` elapses, re-checking
	/// `done` after every wakeup. Returns the final value of `done`.
	///
	/// `done` is evaluated outside of any lock this `Waiter` holds, so it
	/// may itself lock the state it inspects (e.g. a DLCI's state mutex).
	pub fn wait_while<F>(&self, timeout: Duration, mut done: F) -> bool
	where
		F: FnMut() -> bool,
	{
		if done() {
			return true;
		}

		let deadline = Instant::now() + timeout;
		let guard = self.gate.lock().unwrap();
		let mut guard = guard;

		loop {
			if done() {
				return true;
			}

			let now = Instant::now();
			if now >= deadline {
				return false;
			}

			let (next, timeout_result) =
				self.condvar.wait_timeout(guard, deadline - now).unwrap();
			guard = next;
			if timeout_result.timed_out() && !done() {
				return false;
			}
		}
	}

	/// Wakes every consumer blocked in [`Waiter::wait_while`]. Call this
	/// immediately after any state mutation that a waiter's predicate might
	/// now satisfy.
	pub fn notify_all(&self) {
		let _guard = self.gate.lock().unwrap();
		self.condvar.notify_all();
	}
}

impl Default for Waiter {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::sync::Arc;
	use std::thread;

	#[test]
	fn wakes_on_notify() {
		let waiter = Arc::new(Waiter::new());
		let flag = Arc::new(AtomicBool::new(false));

		let w = waiter.clone();
		let f = flag.clone();
		let handle = thread::spawn(move || {
			thread::sleep(Duration::from_millis(20));
			f.store(true, Ordering::SeqCst);
			w.notify_all();
		});

		let satisfied = waiter.wait_while(Duration::from_secs(2), || flag.load(Ordering::SeqCst));
		assert!(satisfied);
		handle.join().unwrap();
	}

	#[test]
	fn times_out_without_notify() {
		let waiter = Waiter::new();
		let satisfied = waiter.wait_while(Duration::from_millis(20), || false);
		assert!(!satisfied);
	}
}
