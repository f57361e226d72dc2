//! End-to-end byte-vector scenarios (S1-S7) driving a `Mux` against an
//! in-memory loopback link, asserting both the literal bytes the engine
//! emits and the state the DLCI table reaches afterwards.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ts0710_mux::drivers::mux::frame::{self, FrameKind};
use ts0710_mux::{ChannelState, Link, Mux, Result};

const FLAG: u8 = 0xF9;
const PN: u8 = 0x20;
const FCOFF: u8 = 0x18;
const TEST: u8 = 0x08;

/// Builds one MCC command/response the way `control::encode_mcc` does,
/// duplicated here since that module is crate-private: short length octet
/// up to 127 bytes, EA-continuation two-octet length above that.
fn encode_mcc(code: u8, is_command: bool, value: &[u8]) -> Vec<u8> {
	let mut buf = Vec::new();
	buf.push(code | 0x01 | if is_command { 0x02 } else { 0 });
	if value.len() <= 127 {
		buf.push(((value.len() as u8) << 1) | 1);
	} else {
		let len = value.len() as u16;
		buf.push(((len & 0x7F) as u8) << 1);
		buf.push((len >> 7) as u8);
	}
	buf.extend_from_slice(value);
	buf
}

/// Slices the payload out of an encoded UIH/SABM/etc frame body (address,
/// control, length, payload, fcs, flag — no leading flag).
fn frame_payload(buf: &[u8]) -> &[u8] {
	let length_byte = buf[3];
	if length_byte & 0x01 != 0 {
		let len = (length_byte >> 1) as usize;
		&buf[4..4 + len]
	} else {
		let low = (length_byte >> 1) as u16;
		let high = buf[4] as u16;
		let len = usize::from((high << 7) | low);
		&buf[5..5 + len]
	}
}

/// Strips the MCC type+length header from a DLCI 0 UIH payload, mirroring
/// `control::decode_mcc`'s own short/long length split.
fn mcc_value(payload: &[u8]) -> &[u8] {
	let length_byte = payload[1];
	if length_byte & 0x01 != 0 {
		let len = (length_byte >> 1) as usize;
		&payload[2..2 + len]
	} else {
		let low = (length_byte >> 1) as u16;
		let high = payload[2] as u16;
		let len = usize::from((high << 7) | low);
		&payload[3..3 + len]
	}
}

#[derive(Clone)]
struct RecordingLink {
	sent: Arc<Mutex<Vec<u8>>>,
}

impl Link for RecordingLink {
	fn write(&self, buf: &[u8]) -> Result<usize> {
		self.sent.lock().unwrap().extend_from_slice(buf);
		Ok(buf.len())
	}

	fn chars_in_buffer(&self) -> usize {
		0
	}
}

fn new_mux(initiator: bool) -> (Arc<Mux>, Arc<Mutex<Vec<u8>>>) {
	let sent = Arc::new(Mutex::new(Vec::new()));
	let link = RecordingLink { sent: sent.clone() };
	(Mux::new(Box::new(link), initiator), sent)
}

fn take_sent(sent: &Mutex<Vec<u8>>) -> Vec<u8> {
	std::mem::take(&mut *sent.lock().unwrap())
}

fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
	let deadline = Instant::now() + timeout;
	loop {
		if cond() {
			return true;
		}
		if Instant::now() >= deadline {
			return false;
		}
		thread::sleep(Duration::from_millis(5));
	}
}

/// Brings DLCI 0 up on `mux`, asserting the S1 byte vector along the way.
fn open_control_channel(mux: &Arc<Mux>, sent: &Mutex<Vec<u8>>) {
	let m = Arc::clone(mux);
	let opener = thread::spawn(move || m.open_channel(0));

	assert!(wait_until(|| !sent.lock().unwrap().is_empty(), Duration::from_secs(1)));
	let bytes = take_sent(sent);
	assert_eq!(&bytes[..4], &[FLAG, 0x03, 0x3F, 0x01]);
	assert_eq!(bytes[5], FLAG);

	let mut ua = Vec::new();
	frame::encode(&mut ua, FrameKind::Ua, 0, true, true, &[]);
	mux.feed(&ua);

	assert!(opener.join().unwrap().is_ok());
	assert_eq!(mux.channel_state(0), Some(ChannelState::Connected));
}

/// Brings DLCI 1 up on `mux` (control channel must already be open),
/// asserting the S2/S3 byte vectors along the way.
fn open_data_channel(mux: &Arc<Mux>, sent: &Mutex<Vec<u8>>) {
	let m = Arc::clone(mux);
	let opener = thread::spawn(move || m.open_channel(1));

	assert!(wait_until(|| !sent.lock().unwrap().is_empty(), Duration::from_secs(1)));
	let pn_cmd = take_sent(sent);
	assert_eq!(&pn_cmd[..3], &[FLAG, 0x03, 0xEF]); // dlci 0, cr=1, UIH
	let pn_value = mcc_value(frame_payload(&pn_cmd)).to_vec();
	assert_eq!(pn_value[0], 1); // dlci=1
	assert_eq!(pn_value[5], 98); // frame_size_l

	let response = encode_mcc(PN, false, &[1, 0, 0, 0, 10, 98, 0, 0]);
	let mut resp_frame = Vec::new();
	frame::encode(&mut resp_frame, FrameKind::Uih, 0, true, false, &response);
	mux.feed(&resp_frame);

	assert!(wait_until(|| !sent.lock().unwrap().is_empty(), Duration::from_secs(1)));
	let sabm1 = take_sent(sent);
	assert_eq!(&sabm1[..4], &[FLAG, 0x07, 0x3F, 0x01]);

	let mut ua1 = Vec::new();
	frame::encode(&mut ua1, FrameKind::Ua, 1, true, true, &[]);
	mux.feed(&ua1);

	assert!(opener.join().unwrap().is_ok());
	assert_eq!(mux.channel_state(1), Some(ChannelState::Connected));
}

#[test]
fn s1_open_dlci0() {
	let (mux, sent) = new_mux(true);
	open_control_channel(&mux, &sent);
}

#[test]
fn s2_s3_negotiate_and_connect_dlci1() {
	let (mux, sent) = new_mux(true);
	open_control_channel(&mux, &sent);
	open_data_channel(&mux, &sent);
}

#[test]
fn s4_write_emits_short_uih() {
	let (mux, sent) = new_mux(true);
	open_control_channel(&mux, &sent);
	open_data_channel(&mux, &sent);

	let n = mux.write(1, b"AT").unwrap();
	assert_eq!(n, 2);

	assert!(wait_until(|| !sent.lock().unwrap().is_empty(), Duration::from_secs(1)));
	let written = take_sent(&sent);
	assert_eq!(&written[..5], &[FLAG, 0x07, 0xEF, 0x05, 0x41]);
	assert_eq!(written[5], 0x54);
	assert_eq!(*written.last().unwrap(), FLAG);
}

#[test]
fn s5_fcoff_stops_all_dlcis() {
	let (mux, sent) = new_mux(true);
	open_control_channel(&mux, &sent);
	open_data_channel(&mux, &sent);

	let fcoff = encode_mcc(FCOFF, true, &[]);
	let mut fcoff_frame = Vec::new();
	frame::encode(&mut fcoff_frame, FrameKind::Uih, 0, false, false, &fcoff);
	mux.feed(&fcoff_frame);

	assert!(wait_until(|| mux.channel_state(1) == Some(ChannelState::FlowStopped), Duration::from_secs(1)));

	let n = mux.write(1, b"AT").unwrap();
	assert_eq!(n, 0);
}

#[test]
fn s6_close_last_dlci_resets_connection() {
	let (mux, sent) = new_mux(true);
	open_control_channel(&mux, &sent);
	open_data_channel(&mux, &sent);

	let m = Arc::clone(&mux);
	let closer = thread::spawn(move || m.close_channel(1));

	assert!(wait_until(|| !sent.lock().unwrap().is_empty(), Duration::from_secs(1)));
	let disc = take_sent(&sent);
	assert_eq!(&disc[..4], &[FLAG, 0x07, 0x53, 0x01]);

	let mut ua = Vec::new();
	frame::encode(&mut ua, FrameKind::Ua, 1, true, true, &[]);
	mux.feed(&ua);

	assert!(closer.join().unwrap().is_ok());
	assert_eq!(mux.channel_state(0), Some(ChannelState::Disconnected));
	assert_eq!(mux.channel_state(1), Some(ChannelState::Disconnected));
}

#[test]
fn s7_test_loopback_succeeds() {
	let (mux, sent) = new_mux(true);
	open_control_channel(&mux, &sent);

	let m = Arc::clone(&mux);
	let tester = thread::spawn(move || m.run_test());

	assert!(wait_until(|| !sent.lock().unwrap().is_empty(), Duration::from_secs(1)));
	let test_cmd = take_sent(&sent);
	let value = mcc_value(frame_payload(&test_cmd));
	assert_eq!(value.len(), 250);

	let response = encode_mcc(TEST, false, value);
	let mut resp_frame = Vec::new();
	frame::encode(&mut resp_frame, FrameKind::Uih, 0, true, false, &response);
	mux.feed(&resp_frame);

	assert!(tester.join().unwrap().is_ok());
}
