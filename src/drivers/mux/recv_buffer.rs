//! Receive buffer (§4.3): accumulates link bytes, resynchronises on the
//! flag byte, and extracts complete frames for the state machine.

use std::collections::VecDeque;

use log::{debug, warn};
use smallvec::SmallVec;

use crate::config::{FLAG, RECV_BUFFER_MIN};
use crate::drivers::mux::frame::{self, Decoded, PeekedHeader};

/// Inline capacity covering a short UIH frame's body without falling back
/// to the heap; longer payloads still work, just via `SmallVec`'s own
/// heap spill.
const INLINE_BODY_LEN: usize = 32;

/// What the scan of a single candidate frame start produced.
enum ScanOutcome {
	/// Not enough bytes yet to tell; caller should stop scanning and wait
	/// for more input.
	NeedMore,
	/// This start flag did not lead to a well-formed frame; skip one byte
	/// and try again from the next position.
	Resync,
	/// A complete, well-formed frame was found; `consumed` is the number of
	/// bytes from (and including) the start flag up to and including the
	/// frame's own trailing flag.
	Frame { consumed: usize, header_len: usize, payload_len: usize },
}

/// Bounded byte buffer fed by [`crate::Mux::feed`].
pub struct RecvBuffer {
	buf: VecDeque<u8>,
}

impl RecvBuffer {
	pub fn new() -> Self {
		Self {
			buf: VecDeque::with_capacity(RECV_BUFFER_MIN),
		}
	}

	pub fn feed(&mut self, bytes: &[u8]) {
		self.buf.extend(bytes.iter().copied());
	}

	/// Drains complete frames from the buffer, invoking `on_frame` for each
	/// one that passes CRC and flag checks. Malformed candidates are
	/// logged and discarded; the buffer never blocks on bad input.
	pub fn drain_frames<F>(&mut self, mut on_frame: F)
	where
		F: FnMut(Decoded<'_>),
	{
		loop {
			// collapse leading bytes up to (and including consecutive
			// runs of) the flag byte
			while self.buf.front() == Some(&FLAG) {
				// look for the start of actual frame content: skip
				// repeated flags, keeping only the last one as our
				// candidate start
				if self.buf.get(1) == Some(&FLAG) {
					self.buf.pop_front();
				} else {
					break;
				}
			}

			let Some(start) = self.buf.iter().position(|&b| b == FLAG) else {
				// no flag at all: nothing usable, drop everything we have
				if !self.buf.is_empty() {
					debug!("recv_buffer: dropping {} bytes with no flag", self.buf.len());
				}
				self.buf.clear();
				return;
			};

			if start > 0 {
				debug!("recv_buffer: dropping {start} bytes preceding flag");
				self.buf.drain(..start);
			}

			// contiguous view of the buffer body (after the opening flag)
			let body: SmallVec<[u8; INLINE_BODY_LEN]> = self.buf.iter().skip(1).copied().collect();

			match scan_one(&body) {
				ScanOutcome::NeedMore => return,
				ScanOutcome::Resync => {
					// this flag wasn't a real frame start; drop it and
					// retry from the next byte
					self.buf.pop_front();
					continue;
				}
				ScanOutcome::Frame {
					consumed,
					header_len,
					payload_len,
				} => {
					let peeked = PeekedHeader { header_len, payload_len };
					match frame::decode(&body[..consumed - 1], peeked) {
						Ok(decoded) => on_frame(decoded),
						Err(err) => warn!("recv_buffer: discarding malformed frame: {err}"),
					}

					// consumed = header+payload+fcs+trailing flag; plus
					// the opening flag itself
					self.buf.drain(..consumed + 1);

					// a shared closing/opening flag between back-to-back
					// frames leaves the next frame's body immediately
					// after; if what remains doesn't start with a flag,
					// treat the current front byte as the next start
					if self.buf.front() != Some(&FLAG) && !self.buf.is_empty() {
						self.buf.push_front(FLAG);
					}
				}
			}
		}
	}
}

impl Default for RecvBuffer {
	fn default() -> Self {
		Self::new()
	}
}

/// Scans `body` (bytes immediately after an opening flag) for one complete
/// frame.
fn scan_one(body: &[u8]) -> ScanOutcome {
	let Some(peeked) = frame::peek_header(body) else {
		return ScanOutcome::NeedMore;
	};

	let expected = peeked.header_len + peeked.payload_len + 1 + 1; // + fcs + trailing flag
	if body.len() < expected {
		return ScanOutcome::NeedMore;
	}

	if body[expected - 1] != FLAG {
		return ScanOutcome::Resync;
	}

	ScanOutcome::Frame {
		consumed: expected,
		header_len: peeked.header_len,
		payload_len: peeked.payload_len,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::drivers::mux::frame::FrameKind;

	#[test]
	fn yields_single_frame() {
		let mut encoded = Vec::new();
		frame::encode(&mut encoded, FrameKind::Sabm, 0, true, true, &[]);

		let mut rb = RecvBuffer::new();
		rb.feed(&encoded);

		let mut seen = Vec::new();
		rb.drain_frames(|decoded| seen.push((decoded.kind, decoded.dlci)));
		assert_eq!(seen, vec![(FrameKind::Sabm, 0)]);
	}

	#[test]
	fn drops_garbage_before_flag() {
		let mut stream = vec![0x11, 0x22, 0x33];
		let mut encoded = Vec::new();
		frame::encode(&mut encoded, FrameKind::Ua, 0, false, true, &[]);
		stream.extend_from_slice(&encoded);

		let mut rb = RecvBuffer::new();
		rb.feed(&stream);

		let mut seen = Vec::new();
		rb.drain_frames(|decoded| seen.push(decoded.kind));
		assert_eq!(seen, vec![FrameKind::Ua]);
	}

	#[test]
	fn handles_shared_flag_between_frames() {
		let mut a = Vec::new();
		frame::encode(&mut a, FrameKind::Sabm, 0, true, true, &[]);
		let mut b = Vec::new();
		frame::encode(&mut b, FrameKind::Ua, 0, false, true, &[]);

		// merge the trailing flag of `a` with the leading flag of `b`
		let mut stream = a.clone();
		stream.pop();
		stream.extend_from_slice(&b);

		let mut rb = RecvBuffer::new();
		rb.feed(&stream);

		let mut seen = Vec::new();
		rb.drain_frames(|decoded| seen.push(decoded.kind));
		assert_eq!(seen, vec![FrameKind::Sabm, FrameKind::Ua]);
	}

	#[test]
	fn waits_for_more_bytes_on_partial_frame() {
		let mut encoded = Vec::new();
		frame::encode(&mut encoded, FrameKind::Uih, 1, true, false, b"AT");

		let mut rb = RecvBuffer::new();
		rb.feed(&encoded[..encoded.len() - 2]);

		let mut seen = Vec::new();
		rb.drain_frames(|decoded| seen.push(decoded.kind));
		assert!(seen.is_empty());

		rb.feed(&encoded[encoded.len() - 2..]);
		rb.drain_frames(|decoded| seen.push(decoded.kind));
		assert_eq!(seen, vec![FrameKind::Uih]);
	}
}
