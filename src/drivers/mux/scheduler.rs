//! Send scheduler (§4.6): fair, non-reentrant sender draining per-DLCI
//! pending UIH frames onto the link.

use std::sync::atomic::Ordering;

use log::warn;

use crate::drivers::mux::dlci::State;
use crate::drivers::mux::frame::FrameKind;
use crate::drivers::mux::Mux;

/// Runs one scheduling pass. Returns `true` if any frame was emitted, so
/// the engine loop knows whether it made progress this round.
pub fn run_once(mux: &Mux) -> bool {
	if mux.dlci.control().state() == State::FlowStopped {
		return false;
	}

	let n = mux.dlci.len();
	if n <= 1 {
		return false;
	}

	let start = mux.sched_start.load(Ordering::SeqCst) % n;
	let mut sent_any = false;

	for offset in 0..n {
		let idx = (start + offset) % n;
		if idx == 0 {
			continue; // control-channel replies are written synchronously elsewhere
		}

		let Some(entry) = mux.dlci.get(idx as u8) else {
			continue;
		};

		let payload = {
			let mut inner = entry.inner.lock().unwrap();
			if !inner.send_slot.filled || inner.state != State::Connected {
				continue;
			}
			inner.send_slot.filled = false;
			std::mem::take(&mut inner.send_slot.payload)
		};

		if !mux.send_frame(FrameKind::Uih, idx as u8, false, true, &payload) {
			warn!("scheduler: short write on dlci {idx}, frame treated as lost");
		}

		sent_any = true;
		mux.sched_start.store((idx + 1) % n, Ordering::SeqCst);
	}

	sent_any
}
