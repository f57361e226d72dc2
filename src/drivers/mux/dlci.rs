//! Per-DLCI state machine and table (§3, §4.4).

use std::collections::VecDeque;
use std::sync::Mutex;

use crossbeam_utils::CachePadded;

use crate::config::DEFAULT_MTU;
use crate::synch::waiter::Waiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Rejected,
	Disconnected,
	Connecting,
	Negotiating,
	Connected,
	Disconnecting,
	FlowStopped,
}

/// A single pending outbound UIH frame for a data DLCI. Only one frame is
/// ever in flight per DLCI (§3's "send slot").
#[derive(Default)]
pub struct SendSlot {
	pub payload: Vec<u8>,
	pub filled: bool,
}

pub struct DlciMutable {
	pub state: State,
	pub flow_control: bool,
	pub initiated: bool,
	pub initiator: bool,
	pub mtu: usize,
	pub open_count: u32,
	pub send_slot: SendSlot,
	/// Inbound queue for a data DLCI: a head segment plus an overflow of
	/// whole packets, tracked as owned collections per §9 rather than the
	/// source's hand-rolled linked list.
	pub head: VecDeque<u8>,
	pub overflow: VecDeque<Vec<u8>>,
	pub total: usize,
	pub post_unthrottle: bool,
	pub throttled: bool,
}

impl DlciMutable {
	fn new() -> Self {
		Self {
			state: State::Disconnected,
			flow_control: false,
			initiated: false,
			initiator: false,
			mtu: DEFAULT_MTU,
			open_count: 0,
			send_slot: SendSlot::default(),
			head: VecDeque::new(),
			overflow: VecDeque::new(),
			total: 0,
			post_unthrottle: false,
			throttled: false,
		}
	}
}

/// One DLCI entry: mutable protocol state plus the wait queues consumers
/// block on.
pub struct Dlci {
	pub dlci: u8,
	/// Cache-line padded so the engine thread locking one DLCI's state
	/// doesn't bounce a neighbouring DLCI's cache line in the same table.
	pub inner: CachePadded<Mutex<DlciMutable>>,
	pub open_wait: Waiter,
	pub close_wait: Waiter,
}

impl Dlci {
	fn new(dlci: u8) -> Self {
		Self {
			dlci,
			inner: CachePadded::new(Mutex::new(DlciMutable::new())),
			open_wait: Waiter::new(),
			close_wait: Waiter::new(),
		}
	}

	pub fn state(&self) -> State {
		self.inner.lock().unwrap().state
	}

	pub fn set_state(&self, state: State) {
		self.inner.lock().unwrap().state = state;
		self.open_wait.notify_all();
		self.close_wait.notify_all();
	}

	pub fn reset(&self) {
		let mut inner = self.inner.lock().unwrap();
		inner.state = State::Disconnected;
		inner.flow_control = false;
		inner.initiated = false;
		inner.mtu = DEFAULT_MTU;
		inner.send_slot = SendSlot::default();
		inner.head.clear();
		inner.overflow.clear();
		inner.total = 0;
		inner.post_unthrottle = false;
		inner.throttled = false;
		drop(inner);
		self.open_wait.notify_all();
		self.close_wait.notify_all();
	}
}

/// The DLCI table: one control channel (DLCI 0) plus `n - 1` data DLCIs.
pub struct DlciTable {
	entries: Vec<Dlci>,
}

impl DlciTable {
	pub fn new(n: usize) -> Self {
		Self {
			entries: (0..n).map(|i| Dlci::new(i as u8)).collect(),
		}
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn get(&self, dlci: u8) -> Option<&Dlci> {
		self.entries.get(usize::from(dlci))
	}

	pub fn control(&self) -> &Dlci {
		&self.entries[0]
	}

	pub fn data_channels(&self) -> impl Iterator<Item = &Dlci> {
		self.entries.iter().skip(1)
	}

	/// Count of data DLCIs currently open (`state != Disconnected`),
	/// used to decide whether closing one was "the last" per §9.
	pub fn open_data_channels(&self) -> usize {
		self.data_channels()
			.filter(|d| d.state() != State::Disconnected)
			.count()
	}

	/// Resets every DLCI to `Disconnected` and wakes all waiters, as on
	/// CLD or DM/DISC on DLCI 0 (§4.4, §7).
	pub fn reset_all(&self) {
		for entry in &self.entries {
			entry.reset();
		}
	}
}
