//! Crate-wide wire and timing constants, centralised the way the teacher's
//! `config.rs` holds the handful of constants shared across the kernel.

use std::time::Duration;

/// Default frame payload size before PN negotiation shrinks it (Siemens
/// MC55i default).
pub const DEFAULT_MTU: usize = 98;

/// Number of DLCIs including the control channel (DLCI 0).
pub const MAX_CHN: usize = 4;

/// TS 27.010 basic-option flag byte, opens and closes every frame.
pub const FLAG: u8 = 0xF9;

/// Payloads at or below this size use the short (7-bit) length encoding;
/// above it they use the long (15-bit, two-octet) encoding.
pub const SHORT_LENGTH_THRESHOLD: usize = 127;

/// Header + FCS overhead of a short UIH frame (address, control, length,
/// fcs), excluding the two flag bytes.
pub const SHORT_UIH_MTU_HDR: usize = 6;

/// Base retry timeout for open/close/test rounds.
pub const RETRY_TIMEOUT: Duration = Duration::from_millis(2500);

/// Retries for a fresh DLCI-0 open.
pub const DLCI0_OPEN_RETRIES: u32 = 10;
/// Retries for a DLCI-0 open joined by a second caller while negotiation is
/// already in flight.
pub const DLCI0_REENTRANT_OPEN_RETRIES: u32 = 11;
/// Retries for each round (PN, then SABM) of a fresh data-DLCI open.
pub const DATA_DLCI_OPEN_RETRIES: u32 = 3;
/// Retries for a data-DLCI open joined by a second caller.
pub const DATA_DLCI_REENTRANT_OPEN_RETRIES: u32 = 8;
/// Retries for DISC on close.
pub const CLOSE_RETRIES: u32 = 3;

/// `ioctl(TEST_CMD)` wait multiplier when this caller starts the test.
pub const TEST_SEND_TIMEOUT_MULTIPLIER: u32 = 2;
/// `ioctl(TEST_CMD)` wait multiplier when joining a test already running.
pub const TEST_REENTRANT_TIMEOUT_MULTIPLIER: u32 = 3;

/// Length of the TEST loopback pattern (`{0, 1, ..., 249}`).
pub const TEST_PATTERN_SIZE: usize = 250;

/// Hard cap on bytes queued per DLCI inbound queue before frames are
/// dropped outright.
pub const INBOUND_CAP: usize = 8192;

/// Minimum receive buffer size fed by the external collaborator.
pub const RECV_BUFFER_MIN: usize = 2048;
