//! Multiplex control command (MCC) encoding and the DLCI-0 dispatcher
//! (§4.5). MCC frames are carried as the payload of UIH frames on DLCI 0.

use bit_field::BitField;
use bitflags::bitflags;
use log::{debug, info, warn};

use crate::drivers::mux::dlci::State;
use crate::drivers::mux::frame::FrameKind;
use crate::drivers::mux::Mux;

pub const PN: u8 = 0x20;
pub const MSC: u8 = 0x38;
pub const FCON: u8 = 0x28;
pub const FCOFF: u8 = 0x18;
pub const TEST: u8 = 0x08;
pub const NSC: u8 = 0x04;
pub const CLD: u8 = 0x30;

const MCC_EA: u8 = 0x01;
const MCC_CR: u8 = 0x02;

pub const V24_FC: u8 = 0x02;
pub const V24_RTC: u8 = 0x04;
pub const V24_RTR: u8 = 0x08;
pub const V24_IC: u8 = 0x40;
pub const V24_DV: u8 = 0x80;

fn mcc_code(type_byte: u8) -> u8 {
	type_byte & !(MCC_EA | MCC_CR)
}

fn mcc_is_command(type_byte: u8) -> bool {
	type_byte & MCC_CR != 0
}

fn make_mcc_type(code: u8, is_command: bool) -> u8 {
	code | MCC_EA | if is_command { MCC_CR } else { 0 }
}

pub struct DecodedMcc<'a> {
	pub code: u8,
	pub is_command: bool,
	pub value: &'a [u8],
}

/// Decodes one MCC command/response from the start of `bytes`. The length
/// field uses the same EA-continuation encoding as the frame header (§4.2):
/// a single octet for lengths up to 127, two for longer ones — needed for
/// TEST's 250-byte loopback pattern, which a single 7-bit length octet
/// cannot represent.
pub fn decode_mcc(bytes: &[u8]) -> Option<DecodedMcc<'_>> {
	if bytes.len() < 2 {
		return None;
	}
	let length_byte = bytes[1];
	let (header_len, len) = if length_byte.get_bit(0) {
		(2, usize::from(length_byte.get_bits(1..8)))
	} else {
		if bytes.len() < 3 {
			return None;
		}
		let low = usize::from(length_byte.get_bits(1..8));
		let high = usize::from(bytes[2]);
		(3, (high << 7) | low)
	};
	if bytes.len() < header_len + len {
		return None;
	}
	Some(DecodedMcc {
		code: mcc_code(bytes[0]),
		is_command: mcc_is_command(bytes[0]),
		value: &bytes[header_len..header_len + len],
	})
}

/// Appends one MCC command/response to `buf` (the UIH payload being built
/// for DLCI 0).
pub fn encode_mcc(buf: &mut Vec<u8>, code: u8, is_command: bool, value: &[u8]) {
	buf.push(make_mcc_type(code, is_command));
	if value.len() <= 127 {
		let mut length_byte: u8 = 0;
		length_byte.set_bit(0, true);
		length_byte.set_bits(1..8, value.len() as u8);
		buf.push(length_byte);
	} else {
		let len = value.len() as u16;
		let mut low_byte: u8 = 0;
		low_byte.set_bit(0, false);
		low_byte.set_bits(1..8, (len & 0x7F) as u8);
		buf.push(low_byte);
		buf.push((len >> 7) as u8);
	}
	buf.extend_from_slice(value);
}

bitflags! {
	/// The raw V.24 signal bits of an MSC value octet, EA bit included.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	struct V24Bits: u8 {
		const EA = MCC_EA;
		const FC = V24_FC;
		const RTC = V24_RTC;
		const RTR = V24_RTR;
		const IC = V24_IC;
		const DV = V24_DV;
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct V24Signals {
	pub fc: bool,
	pub rtc: bool,
	pub rtr: bool,
	pub ic: bool,
	pub dv: bool,
}

impl V24Signals {
	pub fn to_byte(self) -> u8 {
		let mut bits = V24Bits::EA;
		bits.set(V24Bits::FC, self.fc);
		bits.set(V24Bits::RTC, self.rtc);
		bits.set(V24Bits::RTR, self.rtr);
		bits.set(V24Bits::IC, self.ic);
		bits.set(V24Bits::DV, self.dv);
		bits.bits()
	}

	pub fn from_byte(b: u8) -> Self {
		let bits = V24Bits::from_bits_truncate(b);
		Self {
			fc: bits.contains(V24Bits::FC),
			rtc: bits.contains(V24Bits::RTC),
			rtr: bits.contains(V24Bits::RTR),
			ic: bits.contains(V24Bits::IC),
			dv: bits.contains(V24Bits::DV),
		}
	}
}

fn dlci_address_byte(dlci: u8) -> u8 {
	let mut b: u8 = 0;
	b.set_bit(0, true);
	b.set_bit(1, true);
	b.set_bits(2..8, dlci);
	b
}

fn dlci_from_address_byte(byte: u8) -> u8 {
	byte.get_bits(2..8)
}

/// Builds an MSC value (DLCI sub-address octet + V.24 signal octet).
pub fn msc_value(dlci: u8, signals: V24Signals) -> [u8; 2] {
	[dlci_address_byte(dlci), signals.to_byte()]
}

/// The canonical 8-octet basic-option PN body (§4.5): credit-based flow
/// control is never proposed, so no ninth `credits` octet is sent.
#[derive(Debug, Clone, Copy)]
pub struct PnBody {
	pub dlci: u8,
	pub frame_type: u8,
	pub credit_flow: u8,
	pub priority: u8,
	pub ack_timer: u8,
	pub frame_size: u16,
	pub max_retrans: u8,
}

impl PnBody {
	pub fn encode(self) -> [u8; 8] {
		[
			self.dlci,
			self.frame_type,
			self.credit_flow,
			self.priority,
			self.ack_timer,
			(self.frame_size & 0xFF) as u8,
			(self.frame_size >> 8) as u8,
			self.max_retrans,
		]
	}

	pub fn decode(bytes: &[u8]) -> Option<Self> {
		if bytes.len() < 8 {
			return None;
		}
		Some(Self {
			dlci: bytes[0],
			frame_type: bytes[1],
			credit_flow: bytes[2],
			priority: bytes[3],
			ack_timer: bytes[4],
			frame_size: u16::from(bytes[5]) | (u16::from(bytes[6]) << 8),
			max_retrans: bytes[7],
		})
	}
}

/// The 250-byte TEST loopback pattern, `{0, 1, ..., 249}`.
pub fn test_pattern() -> Vec<u8> {
	(0..crate::config::TEST_PATTERN_SIZE as u16).map(|b| (b % 256) as u8).collect()
}

/// Handles one MCC payload received on DLCI 0. Replies, when required, are
/// written synchronously before this returns (§5's ordering guarantee).
pub fn handle(mux: &Mux, payload: &[u8]) {
	let Some(mcc) = decode_mcc(payload) else {
		warn!("control: malformed MCC payload ({} bytes)", payload.len());
		return;
	};

	match mcc.code {
		PN => handle_pn(mux, &mcc),
		MSC => handle_msc(mux, &mcc),
		FCON => handle_fcon(mux, &mcc),
		FCOFF => handle_fcoff(mux, &mcc),
		TEST => handle_test(mux, &mcc),
		NSC => debug!("control: peer reported NSC"),
		CLD => mux.handle_cld(),
		other => {
			debug!("control: unsupported MCC code {other:#x}, replying NSC");
			mux.send_control(NSC, false, &[]);
		}
	}
}

fn handle_pn(mux: &Mux, mcc: &DecodedMcc<'_>) {
	let Some(body) = PnBody::decode(mcc.value) else {
		warn!("control: malformed PN body");
		return;
	};

	let Some(entry) = mux.dlci.get(body.dlci) else {
		warn!("control: PN for unknown dlci {}", body.dlci);
		return;
	};

	if !mcc.is_command {
		// our own PN request accepted; adopt the negotiated mtu
		let mut inner = entry.inner.lock().unwrap();
		inner.mtu = body.frame_size as usize;
		let was_negotiating = inner.state == State::Negotiating;
		if was_negotiating {
			inner.state = State::Connecting;
		}
		drop(inner);
		if was_negotiating {
			entry.open_wait.notify_all();
		}
		return;
	}

	let ours = mux.proposed_mtu();
	let accepted = ours.min(body.frame_size as usize);
	{
		let mut inner = entry.inner.lock().unwrap();
		inner.mtu = accepted;
	}

	let response = PnBody {
		dlci: body.dlci,
		frame_type: body.frame_type,
		credit_flow: 0,
		priority: body.priority,
		ack_timer: body.ack_timer,
		frame_size: accepted as u16,
		max_retrans: body.max_retrans,
	};
	mux.send_control(PN, false, &response.encode());
}

fn handle_msc(mux: &Mux, mcc: &DecodedMcc<'_>) {
	if mcc.value.len() < 2 {
		warn!("control: malformed MSC body");
		return;
	}
	let dlci = dlci_from_address_byte(mcc.value[0]);
	let signals = V24Signals::from_byte(mcc.value[1]);

	let Some(entry) = mux.dlci.get(dlci) else {
		warn!("control: MSC for unknown dlci {dlci}");
		return;
	};

	if mcc.is_command {
		let mut inner = entry.inner.lock().unwrap();
		if signals.fc {
			if inner.state == State::Connected {
				inner.state = State::FlowStopped;
			}
		} else if inner.state == State::FlowStopped {
			inner.state = State::Connected;
		}
		drop(inner);
		entry.open_wait.notify_all();
		mux.send_control(MSC, false, mcc.value);
	}
}

fn handle_fcon(mux: &Mux, mcc: &DecodedMcc<'_>) {
	if !mcc.is_command {
		return;
	}
	// symmetric with handle_fcoff: only dlcis FCOFF actually stopped come
	// back here, not ones a prior per-dlci MSC FC=1 had already stopped.
	if mux.dlci.control().state() == State::FlowStopped {
		mux.dlci.control().set_state(State::Connected);
	}
	for entry in mux.dlci.data_channels() {
		if entry.state() == State::FlowStopped {
			entry.set_state(State::Connected);
		}
	}
	info!("control: FCON received, link flow resumed");
	mux.send_control(FCON, false, &[]);
	mux.kick_scheduler();
}

fn handle_fcoff(mux: &Mux, mcc: &DecodedMcc<'_>) {
	if !mcc.is_command {
		return;
	}
	mux.dlci.control().set_state(State::FlowStopped);
	for entry in mux.dlci.data_channels() {
		entry.set_state(State::FlowStopped);
	}
	info!("control: FCOFF received, all dlcis flow-stopped");
	mux.send_control(FCOFF, false, &[]);
}

fn handle_test(mux: &Mux, mcc: &DecodedMcc<'_>) {
	if mcc.is_command {
		mux.send_control(TEST, false, mcc.value);
		return;
	}
	mux.complete_test(mcc.value);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn short_mcc_round_trips() {
		let mut buf = Vec::new();
		encode_mcc(&mut buf, PN, true, &[1, 2, 3]);
		let decoded = decode_mcc(&buf).unwrap();
		assert_eq!(decoded.code, PN);
		assert!(decoded.is_command);
		assert_eq!(decoded.value, &[1, 2, 3]);
	}

	#[test]
	fn long_mcc_round_trips_test_pattern() {
		let pattern = test_pattern();
		let mut buf = Vec::new();
		encode_mcc(&mut buf, TEST, true, &pattern);
		let decoded = decode_mcc(&buf).unwrap();
		assert_eq!(decoded.code, TEST);
		assert_eq!(decoded.value, pattern.as_slice());
	}

	#[test]
	fn pn_body_round_trips() {
		let body = PnBody {
			dlci: 1,
			frame_type: 0,
			credit_flow: 0,
			priority: 0,
			ack_timer: 10,
			frame_size: 98,
			max_retrans: 3,
		};
		let encoded = body.encode();
		let decoded = PnBody::decode(&encoded).unwrap();
		assert_eq!(decoded.dlci, 1);
		assert_eq!(decoded.frame_size, 98);
	}
}
