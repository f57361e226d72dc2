use std::result;

use thiserror::Error;

/// Crate-wide error taxonomy, mapped onto the numeric codes in `crate::errno`
/// the same way the teacher's `io::Error` maps onto its `errno` constants.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Error {
	#[error("bad FCS on frame (dlci {dlci})")]
	Crc { dlci: u8 },

	#[error("truncated frame: expected {expected} bytes, got {got}")]
	Truncated { expected: usize, got: usize },

	#[error("frame length {len} exceeds MTU + header bound {bound}")]
	OversizedLength { len: usize, bound: usize },

	#[error("frame missing closing flag byte")]
	MissingFlag,

	#[error("protocol error on dlci {dlci}: {reason}")]
	ProtocolError { dlci: u8, reason: &'static str },

	#[error("dlci {dlci} is disconnected")]
	Disconnected { dlci: u8 },

	#[error("remote rejected dlci {dlci}")]
	Rejected { dlci: u8 },

	#[error("operation would block, retry")]
	Again,

	#[error("no such device")]
	NoDevice,

	#[error("invalid argument")]
	InvalidArgument,

	#[error("out of memory")]
	OutOfMemory,

	#[error("test loopback mismatch ({mismatches} bytes differed)")]
	Fault { mismatches: usize },
}

impl Error {
	/// Numeric errno this variant reports to a consumer, mirroring the
	/// teacher's `io::Error` -> `crate::errno` mapping.
	pub fn as_errno(&self) -> i32 {
		match self {
			Error::Crc { .. }
			| Error::Truncated { .. }
			| Error::OversizedLength { .. }
			| Error::MissingFlag
			| Error::ProtocolError { .. } => crate::errno::EPROTO,
			Error::Disconnected { .. } => crate::errno::EDISCONNECTED,
			Error::Rejected { .. } => crate::errno::EREJECTED,
			Error::Again => crate::errno::EAGAIN,
			Error::NoDevice => crate::errno::ENODEV,
			Error::InvalidArgument => crate::errno::EINVAL,
			Error::OutOfMemory => crate::errno::ENOMEM,
			Error::Fault { .. } => crate::errno::EFAULT,
		}
	}
}

pub type Result<T> = result::Result<T, Error>;
