//! TS 27.010 basic-option frame codec (§4.2): flags, address, control,
//! length, payload, FCS.
//!
//! Byte-level bitfield packing uses the `bit_field` crate's bit-range
//! accessors rather than host `#[repr(packed)]` layout, consistent with how
//! bit-level hardware register fields are expressed elsewhere in the
//! teacher's driver stack (§9's design note), grouped behind a small
//! extension trait so call sites read as named field accesses.

use bit_field::BitField;

use crate::config::{FLAG, SHORT_LENGTH_THRESHOLD};
use crate::io::{Error, Result};

pub const SABM: u8 = 0x2F;
pub const UA: u8 = 0x63;
pub const DM: u8 = 0x0F;
pub const DISC: u8 = 0x43;
pub const UIH: u8 = 0xEF;
/// Poll/Final bit, bit 4 of the control byte.
pub const PF: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
	Sabm,
	Ua,
	Dm,
	Disc,
	Uih,
}

impl FrameKind {
	fn control_byte(self) -> u8 {
		match self {
			FrameKind::Sabm => SABM,
			FrameKind::Ua => UA,
			FrameKind::Dm => DM,
			FrameKind::Disc => DISC,
			FrameKind::Uih => UIH,
		}
	}
}

/// Named-field access over the address octet: `EA(1) | C/R(1) | DLCI(6)`.
trait AddressByte {
	fn addr_ea(self) -> bool;
	fn addr_cr(self) -> bool;
	fn addr_dlci(self) -> u8;
}

impl AddressByte for u8 {
	fn addr_ea(self) -> bool {
		self.get_bit(0)
	}

	fn addr_cr(self) -> bool {
		self.get_bit(1)
	}

	fn addr_dlci(self) -> u8 {
		self.get_bits(2..8)
	}
}

fn make_address(dlci: u8, cr: bool) -> u8 {
	let mut addr: u8 = 0;
	addr.set_bit(0, true); // EA: basic option never extends the address octet
	addr.set_bit(1, cr);
	addr.set_bits(2..8, dlci);
	addr
}

/// Result of inspecting the header prefix of a candidate frame, before the
/// full payload has necessarily arrived: the receive buffer uses this to
/// compute the total expected frame length.
#[derive(Debug, Clone, Copy)]
pub struct PeekedHeader {
	pub header_len: usize,
	pub payload_len: usize,
}

/// Inspects `bytes` (starting right after the opening flag) and reports the
/// header length and declared payload length, or `None` if not enough bytes
/// have arrived yet to know which length encoding is in use.
pub fn peek_header(bytes: &[u8]) -> Option<PeekedHeader> {
	if bytes.len() < 3 {
		return None;
	}

	let length_byte = bytes[2];
	if length_byte.get_bit(0) {
		// short length: EA=1 | len(7)
		Some(PeekedHeader {
			header_len: 3,
			payload_len: usize::from(length_byte.get_bits(1..8)),
		})
	} else {
		if bytes.len() < 4 {
			return None;
		}
		let l_len = u16::from(length_byte.get_bits(1..8));
		let h_len = u16::from(bytes[3]);
		Some(PeekedHeader {
			header_len: 4,
			payload_len: usize::from((h_len << 7) | l_len),
		})
	}
}

#[derive(Debug, Clone, Copy)]
pub struct Decoded<'a> {
	pub kind: FrameKind,
	pub dlci: u8,
	pub cr: bool,
	pub pf: bool,
	pub payload: &'a [u8],
}

/// Decodes a frame body (header + payload + fcs, no flags) given a prior
/// [`peek_header`] result. `bytes` may contain trailing bytes beyond this
/// frame; only `header_len + payload_len + 1` of it is consumed.
pub fn decode<'a>(bytes: &'a [u8], peeked: PeekedHeader) -> Result<Decoded<'a>> {
	let total = peeked.header_len + peeked.payload_len + 1;
	if bytes.len() < total {
		return Err(Error::Truncated {
			expected: total,
			got: bytes.len(),
		});
	}

	let addr = bytes[0];
	let dlci = addr.addr_dlci();
	let cr = addr.addr_cr();
	debug_assert!(addr.addr_ea());

	let ctrl_byte = bytes[1];
	let pf = ctrl_byte & PF != 0;
	let kind = match ctrl_byte & !PF {
		SABM => FrameKind::Sabm,
		UA => FrameKind::Ua,
		DM => FrameKind::Dm,
		DISC => FrameKind::Disc,
		UIH => FrameKind::Uih,
		_ => {
			return Err(Error::ProtocolError {
				dlci,
				reason: "unrecognised control byte",
			});
		}
	};

	let payload = &bytes[peeked.header_len..peeked.header_len + peeked.payload_len];
	let fcs = bytes[peeked.header_len + peeked.payload_len];

	if !crate::drivers::mux::crc::check(&bytes[..peeked.header_len], fcs) {
		return Err(Error::Crc { dlci });
	}

	Ok(Decoded {
		kind,
		dlci,
		cr,
		pf,
		payload,
	})
}

/// Encodes a frame (flag, header, payload, fcs, flag) into `buf`, returning
/// the number of bytes appended.
pub fn encode(buf: &mut Vec<u8>, kind: FrameKind, dlci: u8, cr: bool, pf: bool, payload: &[u8]) -> usize {
	let start_len = buf.len();
	buf.push(FLAG);

	let header_start = buf.len();
	buf.push(make_address(dlci, cr));
	buf.push(kind.control_byte() | if pf { PF } else { 0 });

	let header_len = if payload.len() <= SHORT_LENGTH_THRESHOLD {
		let mut length_byte: u8 = 0;
		length_byte.set_bit(0, true);
		length_byte.set_bits(1..8, payload.len() as u8);
		buf.push(length_byte);
		3
	} else {
		let len = payload.len() as u16;
		let mut l_byte: u8 = 0;
		l_byte.set_bit(0, false);
		l_byte.set_bits(1..8, (len & 0x7F) as u8);
		buf.push(l_byte);
		buf.push((len >> 7) as u8);
		4
	};

	let fcs = crate::drivers::mux::crc::calc(&buf[header_start..header_start + header_len]);
	buf.extend_from_slice(payload);
	buf.push(fcs);
	buf.push(FLAG);

	buf.len() - start_len
}

#[cfg(test)]
mod tests {
	use super::*;

	fn round_trip(kind: FrameKind, dlci: u8, cr: bool, pf: bool, payload: &[u8]) {
		let mut buf = Vec::new();
		encode(&mut buf, kind, dlci, cr, pf, payload);
		assert_eq!(buf[0], FLAG);
		assert_eq!(*buf.last().unwrap(), FLAG);

		let body = &buf[1..buf.len() - 1];
		let peeked = peek_header(body).expect("enough bytes for header");
		let decoded = decode(body, peeked).expect("valid frame");
		assert_eq!(decoded.kind, kind);
		assert_eq!(decoded.dlci, dlci);
		assert_eq!(decoded.cr, cr);
		assert_eq!(decoded.pf, pf);
		assert_eq!(decoded.payload, payload);
	}

	#[test]
	fn sabm_round_trips() {
		round_trip(FrameKind::Sabm, 0, true, true, &[]);
	}

	#[test]
	fn short_uih_round_trips() {
		round_trip(FrameKind::Uih, 1, true, false, b"AT");
	}

	#[test]
	fn long_uih_round_trips() {
		let payload = vec![0xAAu8; 200];
		round_trip(FrameKind::Uih, 2, false, false, &payload);
	}

	#[test]
	fn s1_sabm_bytes() {
		// S1: open DLCI 0, initiator=1
		let mut buf = Vec::new();
		encode(&mut buf, FrameKind::Sabm, 0, true, true, &[]);
		assert_eq!(&buf[..4], &[FLAG, 0x03, 0x3F, 0x01]);
		assert_eq!(buf[5], FLAG);
	}

	#[test]
	fn s4_write_bytes() {
		// S4: "AT" on DLCI 1
		let mut buf = Vec::new();
		encode(&mut buf, FrameKind::Uih, 1, true, false, b"AT");
		assert_eq!(&buf[..5], &[FLAG, 0x07, 0xEF, 0x05, 0x41]);
		assert_eq!(buf[5], 0x54);
		assert_eq!(buf[buf.len() - 1], FLAG);
	}

	#[test]
	fn truncated_is_rejected() {
		let mut buf = Vec::new();
		encode(&mut buf, FrameKind::Uih, 1, true, false, b"AT");
		let body = &buf[1..buf.len() - 1];
		let peeked = peek_header(body).unwrap();
		let short = &body[..body.len() - 2];
		assert!(matches!(decode(short, peeked), Err(Error::Truncated { .. })));
	}

	#[test]
	fn bad_crc_is_rejected() {
		let mut buf = Vec::new();
		encode(&mut buf, FrameKind::Uih, 1, true, false, b"AT");
		let len = buf.len();
		buf[len - 2] ^= 0xFF; // corrupt the fcs byte
		let body = &buf[1..len - 1];
		let peeked = peek_header(body).unwrap();
		assert!(matches!(decode(body, peeked), Err(Error::Crc { .. })));
	}
}
