//! The virtual-channel facade (§4.8): a consumer's open handle on one
//! DLCI, wrapping the shared [`Mux`] the same way the teacher's
//! `ObjectInterface` implementors (`UhyveFile`, `GenericFile`) wrap a
//! single underlying descriptor behind `read`/`write`/`ioctl`.

use std::sync::Arc;

use crate::drivers::mux::Mux;
use crate::io::Result;

/// The two `ioctl` commands a virtual channel supports (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCmd {
	/// Send MSC with RTR|DV only, the modem-hangup signal.
	Hangup,
	/// Run the TEST loopback and block until it completes or times out.
	Test,
}

/// A consumer's handle on one DLCI. Opening negotiates (or joins) the
/// channel; dropping it closes the channel, tearing down the connection
/// entirely if it was the last open data channel (§4.4, §9).
pub struct VirtualChannel {
	mux: Arc<Mux>,
	dlci: u8,
}

impl VirtualChannel {
	/// Opens (or, if already open, joins) `dlci` on `mux`.
	pub fn open(mux: Arc<Mux>, dlci: u8) -> Result<Self> {
		mux.open_channel(dlci)?;
		Ok(Self { mux, dlci })
	}

	pub fn dlci(&self) -> u8 {
		self.dlci
	}

	/// Copies up to `mtu - header overhead` bytes into the send slot and
	/// kicks the scheduler; returns the number of bytes actually queued.
	pub fn write(&self, buf: &[u8]) -> Result<usize> {
		self.mux.write(self.dlci, buf)
	}

	/// Bytes the next `write` could accept right now.
	pub fn write_room(&self) -> usize {
		self.mux.write_room(self.dlci)
	}

	/// Nonzero while a previous write is still queued for the scheduler.
	pub fn chars_in_buffer(&self) -> usize {
		self.mux.chars_in_buffer(self.dlci)
	}

	/// Copies queued inbound bytes into `buf`.
	pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
		self.mux.read(self.dlci, buf)
	}

	pub fn throttle(&self) -> Result<()> {
		self.mux.throttle(self.dlci)
	}

	pub fn unthrottle(&self) -> Result<()> {
		self.mux.unthrottle(self.dlci)
	}

	pub fn ioctl(&self, cmd: IoctlCmd) -> Result<()> {
		match cmd {
			IoctlCmd::Hangup => {
				self.mux.hangup(self.dlci);
				Ok(())
			}
			IoctlCmd::Test => self.mux.run_test(),
		}
	}
}

impl Drop for VirtualChannel {
	fn drop(&mut self) {
		let _ = self.mux.close_channel(self.dlci);
	}
}
