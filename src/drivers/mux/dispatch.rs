//! Receive dispatcher (§4.7): maps decoded frames to state-machine
//! transitions, and demultiplexed UIH payloads to per-channel inbound
//! queues with per-channel backpressure.

use log::warn;

use crate::config::INBOUND_CAP;
use crate::drivers::mux::control::{self, V24Signals};
use crate::drivers::mux::dlci::State;
use crate::drivers::mux::frame::{Decoded, FrameKind};
use crate::drivers::mux::Mux;

pub fn handle_frame(mux: &Mux, decoded: Decoded<'_>) {
	match decoded.kind {
		FrameKind::Sabm => handle_sabm(mux, &decoded),
		FrameKind::Ua => handle_ua(mux, &decoded),
		FrameKind::Dm => handle_dm(mux, &decoded),
		FrameKind::Disc => handle_disc(mux, &decoded),
		FrameKind::Uih => handle_uih(mux, &decoded),
	}
}

fn handle_sabm(mux: &Mux, decoded: &Decoded<'_>) {
	let Some(entry) = mux.dlci.get(decoded.dlci) else {
		mux.send_frame(FrameKind::Dm, decoded.dlci, true, false, &[]);
		return;
	};
	// a data dlci can only come up once the control channel is itself up
	// (§8 property 6); reject with DM rather than silently connecting.
	if decoded.dlci != 0 && !matches!(mux.dlci.control().state(), State::Connected | State::FlowStopped) {
		mux.send_frame(FrameKind::Dm, decoded.dlci, true, false, &[]);
		return;
	}
	entry.set_state(State::Connected);
	mux.send_frame(FrameKind::Ua, decoded.dlci, decoded.pf, false, &[]);
}

fn handle_ua(mux: &Mux, decoded: &Decoded<'_>) {
	// UA acknowledges whichever of SABM/DISC is outstanding; which one
	// depends on the state the DLCI was in when it was sent (§4.4).
	if let Some(entry) = mux.dlci.get(decoded.dlci) {
		let next = if entry.state() == State::Disconnecting {
			State::Disconnected
		} else {
			State::Connected
		};
		entry.set_state(next);
	}
}

fn handle_dm(mux: &Mux, decoded: &Decoded<'_>) {
	if decoded.dlci == 0 {
		mux.dlci.reset_all();
		return;
	}
	if let Some(entry) = mux.dlci.get(decoded.dlci) {
		entry.set_state(State::Rejected);
	}
}

fn handle_disc(mux: &Mux, decoded: &Decoded<'_>) {
	if decoded.dlci == 0 {
		mux.send_frame(FrameKind::Ua, 0, decoded.pf, false, &[]);
		mux.dlci.reset_all();
		return;
	}
	if let Some(entry) = mux.dlci.get(decoded.dlci) {
		mux.send_frame(FrameKind::Ua, decoded.dlci, decoded.pf, false, &[]);
		entry.reset();
	}
}

fn handle_uih(mux: &Mux, decoded: &Decoded<'_>) {
	if decoded.dlci == 0 {
		control::handle(mux, decoded.payload);
		return;
	}
	deliver_data(mux, decoded.dlci, decoded.payload);
}

fn deliver_data(mux: &Mux, dlci: u8, payload: &[u8]) {
	let Some(entry) = mux.dlci.get(dlci) else {
		mux.send_frame(FrameKind::Dm, dlci, true, false, &[]);
		return;
	};

	let state = entry.state();
	if !matches!(state, State::Connected | State::FlowStopped) {
		mux.send_frame(FrameKind::Dm, dlci, true, false, &[]);
		return;
	}

	let mut inner = entry.inner.lock().unwrap();
	if payload.len() > inner.mtu {
		warn!("dispatch: dropping oversized uih payload on dlci {dlci} ({} > {})", payload.len(), inner.mtu);
		return;
	}

	if inner.total + payload.len() > INBOUND_CAP {
		warn!("dispatch: inbound cap exceeded on dlci {dlci}, dropping frame");
		return;
	}

	if !inner.throttled && inner.overflow.is_empty() {
		inner.head.extend(payload.iter().copied());
	} else {
		inner.overflow.push_back(payload.to_vec());
	}
	inner.total += payload.len();

	let should_flow_stop = inner.total + inner.mtu > INBOUND_CAP;
	let mtu_for_signal = inner.mtu;
	drop(inner);

	if should_flow_stop {
		let _ = mtu_for_signal;
		mux.send_control(control::MSC, true, &control::msc_value(dlci, V24Signals { fc: true, ..Default::default() }));
	}
}

/// The post-receive worker: drains queued overflow packets into a DLCI's
/// head buffer once it is unthrottled, and sends the MSC FC=0 re-enable
/// once the queue has fully drained. Returns `true` if any progress was
/// made, so the engine loop knows whether to keep spinning.
pub fn drain_post_receive(mux: &Mux) -> bool {
	let mut progressed = false;

	for entry in mux.dlci.data_channels() {
		let mut inner = entry.inner.lock().unwrap();
		if inner.throttled {
			continue;
		}

		while let Some(packet) = inner.overflow.pop_front() {
			inner.head.extend(packet.iter().copied());
			progressed = true;
		}

		if inner.post_unthrottle && inner.overflow.is_empty() {
			inner.post_unthrottle = false;
			drop(inner);
			mux.send_control(control::MSC, true, &control::msc_value(entry.dlci, V24Signals { fc: false, ..Default::default() }));
			progressed = true;
		}
	}

	progressed
}
