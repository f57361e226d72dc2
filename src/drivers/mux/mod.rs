//! The TS 27.010 basic-option multiplexer engine: one owned [`Mux`] value,
//! constructed by the caller and handed a [`link::Link`] implementation.
//! All components here take a `&Mux` context rather than reading global
//! state (§3, §9).

pub(crate) mod control;
pub(crate) mod crc;
pub(crate) mod dispatch;
pub mod dlci;
pub mod frame;
pub mod link;
pub(crate) mod recv_buffer;
pub(crate) mod scheduler;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::info;

use crate::config::{
	CLOSE_RETRIES, DATA_DLCI_OPEN_RETRIES, DATA_DLCI_REENTRANT_OPEN_RETRIES, DEFAULT_MTU,
	DLCI0_OPEN_RETRIES, DLCI0_REENTRANT_OPEN_RETRIES, MAX_CHN, RETRY_TIMEOUT,
	SHORT_UIH_MTU_HDR, TEST_REENTRANT_TIMEOUT_MULTIPLIER, TEST_SEND_TIMEOUT_MULTIPLIER,
};
use crate::drivers::mux::control::{PnBody, V24Signals};
use crate::drivers::mux::dlci::{DlciTable, State};
use crate::drivers::mux::frame::FrameKind;
use crate::drivers::mux::link::Link;
use crate::drivers::mux::recv_buffer::RecvBuffer;
use crate::io::{Error, Result};
use crate::synch::semaphore::Semaphore;
use crate::synch::waiter::Waiter;

struct TestState {
	in_progress: bool,
	mismatches: Option<usize>,
}

/// The multiplexer connection. Owns the link, the DLCI table, and the
/// engine thread that drives the send/receive/post-receive workers.
pub struct Mux {
	link: Box<dyn Link>,
	initiator: bool,
	dlci: DlciTable,
	recv: Mutex<RecvBuffer>,
	/// Released whenever the engine has something to do: inbound bytes, a
	/// queued outbound frame, or an unthrottle (§5's "self-rescheduling on
	/// contention" realised as one thread blocking on this instead).
	work: Semaphore,
	write_mutex: Mutex<()>,
	shutdown: AtomicBool,
	sched_start: AtomicUsize,
	test: Mutex<TestState>,
	test_wait: Waiter,
	engine: Mutex<Option<JoinHandle<()>>>,
}

impl Mux {
	/// Builds a multiplexer over `link` and spawns its engine thread.
	/// `initiator` records whether this side originates SABM/PN commands
	/// (the C/R convention of §4.2).
	pub fn new(link: Box<dyn Link>, initiator: bool) -> Arc<Mux> {
		let mux = Arc::new(Mux {
			link,
			initiator,
			dlci: DlciTable::new(MAX_CHN),
			recv: Mutex::new(RecvBuffer::new()),
			work: Semaphore::new(0),
			write_mutex: Mutex::new(()),
			shutdown: AtomicBool::new(false),
			sched_start: AtomicUsize::new(1),
			test: Mutex::new(TestState { in_progress: false, mismatches: None }),
			test_wait: Waiter::new(),
			engine: Mutex::new(None),
		});

		let engine_mux = Arc::clone(&mux);
		let handle = thread::spawn(move || engine_loop(engine_mux));
		*mux.engine.lock().unwrap() = Some(handle);
		mux
	}

	/// Entry point the host calls whenever bytes arrive from the real
	/// link (`link_bytes` in §6's external interface).
	pub fn feed(&self, bytes: &[u8]) {
		self.recv.lock().unwrap().feed(bytes);
		self.work.release();
	}

	pub(crate) fn kick_scheduler(&self) {
		self.work.release();
	}

	fn cr_for(&self, is_command: bool) -> bool {
		if is_command {
			self.initiator
		} else {
			!self.initiator
		}
	}

	/// Encodes and writes one frame, returning `true` if the link accepted
	/// it in full. A short write is treated as frame loss (§4.6, §9).
	pub(crate) fn send_frame(&self, kind: FrameKind, dlci: u8, pf: bool, is_command: bool, payload: &[u8]) -> bool {
		let mut buf = Vec::new();
		frame::encode(&mut buf, kind, dlci, self.cr_for(is_command), pf, payload);
		self.write_raw(&buf)
	}

	pub(crate) fn send_control(&self, code: u8, is_command: bool, value: &[u8]) {
		let mut payload = Vec::new();
		control::encode_mcc(&mut payload, code, is_command, value);
		self.send_frame(FrameKind::Uih, 0, false, is_command, &payload);
	}

	fn write_raw(&self, bytes: &[u8]) -> bool {
		let _guard = self.write_mutex.lock().unwrap();
		matches!(self.link.write(bytes), Ok(n) if n == bytes.len())
	}

	pub(crate) fn proposed_mtu(&self) -> usize {
		DEFAULT_MTU
	}

	pub(crate) fn handle_cld(&self) {
		info!("mux: CLD received, resetting connection");
		self.dlci.reset_all();
	}

	pub(crate) fn complete_test(&self, echoed: &[u8]) {
		let pattern = control::test_pattern();
		let mismatches = pattern.iter().zip(echoed.iter()).filter(|(a, b)| a != b).count()
			+ pattern.len().abs_diff(echoed.len());

		let mut state = self.test.lock().unwrap();
		state.in_progress = false;
		state.mismatches = Some(mismatches);
		drop(state);
		self.test_wait.notify_all();
	}

	/// Brings up DLCI 0 if needed, then the given data DLCI (§4.8 `open`).
	pub fn open_channel(&self, dlci: u8) -> Result<()> {
		if dlci == 0 {
			self.open_control_channel()
		} else {
			self.open_data_channel(dlci)
		}
	}

	fn open_control_channel(&self) -> Result<()> {
		let entry = self.dlci.control();

		let reentrant = {
			let mut inner = entry.inner.lock().unwrap();
			match inner.state {
				State::Connected | State::FlowStopped => return Ok(()),
				State::Connecting => true,
				_ => {
					inner.state = State::Connecting;
					inner.initiated = true;
					false
				}
			}
		};

		let retries = if reentrant { DLCI0_REENTRANT_OPEN_RETRIES } else { DLCI0_OPEN_RETRIES };

		for _ in 0..retries {
			if !reentrant {
				self.send_frame(FrameKind::Sabm, 0, true, true, &[]);
			}
			let done = entry.open_wait.wait_while(RETRY_TIMEOUT, || {
				matches!(entry.state(), State::Connected | State::FlowStopped | State::Rejected)
			});
			if done {
				return match entry.state() {
					State::Rejected => Err(Error::Rejected { dlci: 0 }),
					_ => Ok(()),
				};
			}
		}

		Err(Error::Again)
	}

	fn open_data_channel(&self, dlci: u8) -> Result<()> {
		self.open_control_channel()?;
		let entry = self.dlci.get(dlci).ok_or(Error::InvalidArgument)?;

		let reentrant = {
			let mut inner = entry.inner.lock().unwrap();
			match inner.state {
				State::Connected | State::FlowStopped => {
					inner.open_count += 1;
					return Ok(());
				}
				State::Disconnected => {
					inner.state = State::Negotiating;
					inner.initiator = true;
					inner.initiated = true;
					false
				}
				_ => true,
			}
		};

		let retries = if reentrant {
			DATA_DLCI_REENTRANT_OPEN_RETRIES
		} else {
			DATA_DLCI_OPEN_RETRIES
		};

		if !reentrant {
			let mut negotiated = false;
			for _ in 0..retries {
				let body = PnBody {
					dlci,
					frame_type: 0,
					credit_flow: 0,
					priority: 0,
					ack_timer: 10,
					frame_size: self.proposed_mtu() as u16,
					max_retrans: 3,
				};
				self.send_control(control::PN, true, &body.encode());
				negotiated = entry.open_wait.wait_while(RETRY_TIMEOUT, || entry.state() != State::Negotiating);
				if negotiated {
					break;
				}
			}
			if !negotiated {
				return Err(Error::Again);
			}

			let mut connected = false;
			for _ in 0..retries {
				self.send_frame(FrameKind::Sabm, dlci, true, true, &[]);
				connected = entry
					.open_wait
					.wait_while(RETRY_TIMEOUT, || matches!(entry.state(), State::Connected | State::FlowStopped | State::Rejected));
				if connected {
					break;
				}
			}
			if !connected {
				return Err(Error::Again);
			}
		} else {
			let done = entry.open_wait.wait_while(RETRY_TIMEOUT * retries, || {
				matches!(entry.state(), State::Connected | State::FlowStopped | State::Rejected)
			});
			if !done {
				return Err(Error::Again);
			}
		}

		match entry.state() {
			State::Rejected => Err(Error::Rejected { dlci }),
			_ => {
				entry.inner.lock().unwrap().open_count += 1;
				Ok(())
			}
		}
	}

	/// Closes a consumer's handle on `dlci`; only tears down the channel
	/// once every handle has closed (§4.8 `close`).
	pub fn close_channel(&self, dlci: u8) -> Result<()> {
		if dlci == 0 {
			return Ok(());
		}
		let entry = self.dlci.get(dlci).ok_or(Error::InvalidArgument)?;

		let remaining = {
			let mut inner = entry.inner.lock().unwrap();
			if inner.open_count > 0 {
				inner.open_count -= 1;
			}
			inner.open_count
		};
		if remaining > 0 {
			return Ok(());
		}

		entry.inner.lock().unwrap().state = State::Disconnecting;

		for _ in 0..CLOSE_RETRIES {
			self.send_frame(FrameKind::Disc, dlci, true, true, &[]);
			let acked = entry.close_wait.wait_while(RETRY_TIMEOUT, || entry.state() == State::Disconnected);
			if acked {
				break;
			}
		}
		entry.reset();

		if self.dlci.open_data_channels() == 0 {
			self.send_control(control::CLD, true, &[]);
			// ts0710_close_channel's tail flow-enables the just-closed
			// dlci and drains queued receive work before the reset (§2A)
			self.kick_scheduler();
			self.dlci.reset_all();
		}

		Ok(())
	}

	/// `write(buf, n)` of §4.8: copies up to `mtu - header overhead` bytes
	/// into the send slot and kicks the scheduler.
	pub fn write(&self, dlci: u8, buf: &[u8]) -> Result<usize> {
		let entry = self.dlci.get(dlci).ok_or(Error::InvalidArgument)?;
		let mut inner = entry.inner.lock().unwrap();

		match inner.state {
			State::Connected => {}
			// flow-stopped is a transient backpressure signal, not a
			// hard failure: the caller sees a short write, not an error.
			State::FlowStopped => return Ok(0),
			_ => return Err(Error::Disconnected { dlci }),
		}
		if inner.send_slot.filled {
			return Ok(0);
		}

		let cap = inner.mtu.saturating_sub(SHORT_UIH_MTU_HDR).max(1);
		let n = buf.len().min(cap);
		inner.send_slot.payload = buf[..n].to_vec();
		inner.send_slot.filled = true;
		drop(inner);

		self.kick_scheduler();
		Ok(n)
	}

	pub fn write_room(&self, dlci: u8) -> usize {
		let Some(entry) = self.dlci.get(dlci) else { return 0 };
		let inner = entry.inner.lock().unwrap();
		if matches!(inner.state, State::Connected) && !inner.send_slot.filled {
			inner.mtu.saturating_sub(1)
		} else {
			0
		}
	}

	pub fn chars_in_buffer(&self, dlci: u8) -> usize {
		let Some(entry) = self.dlci.get(dlci) else { return 0 };
		let inner = entry.inner.lock().unwrap();
		if inner.send_slot.filled {
			usize::MAX
		} else {
			0
		}
	}

	/// Copies queued inbound bytes into `buf`, draining the overflow list
	/// into the head buffer as needed.
	pub fn read(&self, dlci: u8, buf: &mut [u8]) -> Result<usize> {
		let entry = self.dlci.get(dlci).ok_or(Error::InvalidArgument)?;
		let mut inner = entry.inner.lock().unwrap();

		if inner.head.is_empty() {
			if let Some(packet) = inner.overflow.pop_front() {
				inner.head.extend(packet);
			}
		}

		let n = inner.head.len().min(buf.len());
		for slot in buf.iter_mut().take(n) {
			*slot = inner.head.pop_front().unwrap();
		}
		inner.total = inner.total.saturating_sub(n);
		Ok(n)
	}

	/// Sends MSC with FC=1 for `dlci` (§4.8 `throttle`).
	pub fn throttle(&self, dlci: u8) -> Result<()> {
		let entry = self.dlci.get(dlci).ok_or(Error::InvalidArgument)?;
		entry.inner.lock().unwrap().throttled = true;
		self.send_control(control::MSC, true, &control::msc_value(dlci, V24Signals { fc: true, ..Default::default() }));
		Ok(())
	}

	/// Schedules the post-receive worker to drain queued inbound data and,
	/// once it's empty, send MSC FC=0 (§4.8 `unthrottle`).
	pub fn unthrottle(&self, dlci: u8) -> Result<()> {
		let entry = self.dlci.get(dlci).ok_or(Error::InvalidArgument)?;
		{
			let mut inner = entry.inner.lock().unwrap();
			inner.throttled = false;
			inner.post_unthrottle = true;
		}
		self.kick_scheduler();
		Ok(())
	}

	/// `ioctl(MSC_HANGUP)`: signals EA|RTR|DV only, no FC/RTC (§2A).
	pub fn hangup(&self, dlci: u8) {
		self.send_control(control::MSC, true, &control::msc_value(dlci, V24Signals { rtr: true, dv: true, ..Default::default() }));
	}

	/// `ioctl(TEST_CMD)`: runs the loopback test and waits for the echo,
	/// `2x`/`3x` the base timeout depending on whether this call starts
	/// the test or joins one already running (§2A).
	pub fn run_test(&self) -> Result<()> {
		let reentrant = {
			let mut state = self.test.lock().unwrap();
			let reentrant = state.in_progress;
			if !reentrant {
				state.in_progress = true;
				state.mismatches = None;
			}
			reentrant
		};

		if !reentrant {
			let pattern = control::test_pattern();
			self.send_control(control::TEST, true, &pattern);
		}

		let multiplier = if reentrant {
			TEST_REENTRANT_TIMEOUT_MULTIPLIER
		} else {
			TEST_SEND_TIMEOUT_MULTIPLIER
		};
		let done = self
			.test_wait
			.wait_while(RETRY_TIMEOUT * multiplier, || !self.test.lock().unwrap().in_progress);
		if !done {
			return Err(Error::Again);
		}

		match self.test.lock().unwrap().mismatches {
			Some(0) => Ok(()),
			Some(mismatches) => Err(Error::Fault { mismatches }),
			None => Err(Error::Again),
		}
	}

	/// Stops the engine thread. Consumers blocked in a waiter observe the
	/// `shutdown` flag and return `Error::Again`, the retryable error this
	/// crate uses in place of a POSIX signal (§5).
	pub fn shutdown(&self) {
		self.shutdown.store(true, Ordering::SeqCst);
		self.work.release();
	}

	pub(crate) fn is_shutdown(&self) -> bool {
		self.shutdown.load(Ordering::SeqCst)
	}

	pub fn dlci_count(&self) -> usize {
		self.dlci.len()
	}

	/// Current state of `dlci`, for embedders that want to observe the
	/// state machine directly (and for integration tests).
	pub fn channel_state(&self, dlci: u8) -> Option<State> {
		self.dlci.get(dlci).map(|entry| entry.state())
	}
}

impl Drop for Mux {
	fn drop(&mut self) {
		self.shutdown.store(true, Ordering::SeqCst);
		self.work.release();
		if let Some(handle) = self.engine.lock().unwrap().take() {
			let _ = handle.join();
		}
	}
}

fn engine_loop(mux: Arc<Mux>) {
	loop {
		if mux.is_shutdown() {
			return;
		}

		let mut progressed = false;
		{
			let mut recv = mux.recv.lock().unwrap();
			recv.drain_frames(|decoded| {
				progressed = true;
				dispatch::handle_frame(&mux, decoded);
			});
		}
		if scheduler::run_once(&mux) {
			progressed = true;
		}
		if dispatch::drain_post_receive(&mux) {
			progressed = true;
		}

		if !progressed {
			mux.work.acquire(Some(Duration::from_millis(250)));
		}
	}
}
