//! Handle table mapping small integer handles to open [`VirtualChannel`]s,
//! in the shape of the teacher's `OBJECT_MAP`/`FD_COUNTER` file-descriptor
//! table (`open`/`get_object`/`remove_object`), rebuilt on `std::sync::Mutex`
//! since this crate runs hosted rather than as kernel code.

pub mod channel;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::drivers::mux::Mux;
use crate::fd::channel::VirtualChannel;
use crate::io::{Error, Result};

pub type Handle = i32;

/// Per-`Mux` table of open virtual channels. One of these lives alongside
/// a `Mux`; an embedder wanting POSIX-style small-integer handles uses this
/// instead of holding `VirtualChannel`s directly.
pub struct ChannelTable {
	mux: Arc<Mux>,
	open: Mutex<BTreeMap<Handle, Arc<VirtualChannel>>>,
	next: AtomicI32,
}

impl ChannelTable {
	pub fn new(mux: Arc<Mux>) -> Self {
		Self {
			mux,
			open: Mutex::new(BTreeMap::new()),
			next: AtomicI32::new(0),
		}
	}

	/// Opens `dlci`, allocating a fresh handle for it.
	pub fn open(&self, dlci: u8) -> Result<Handle> {
		let channel = VirtualChannel::open(Arc::clone(&self.mux), dlci)?;
		let handle = self.next.fetch_add(1, Ordering::SeqCst);
		self.open.lock().unwrap().insert(handle, Arc::new(channel));
		Ok(handle)
	}

	pub fn get(&self, handle: Handle) -> Result<Arc<VirtualChannel>> {
		self.open.lock().unwrap().get(&handle).cloned().ok_or(Error::InvalidArgument)
	}

	/// Closes `handle`. The underlying DLCI is only torn down once every
	/// handle referencing it (and every clone of this `Arc`) has dropped.
	pub fn close(&self, handle: Handle) -> Result<()> {
		self.open.lock().unwrap().remove(&handle).ok_or(Error::InvalidArgument)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::drivers::mux::link::Link;

	struct NullLink;
	impl Link for NullLink {
		fn write(&self, buf: &[u8]) -> Result<usize> {
			Ok(buf.len())
		}
		fn chars_in_buffer(&self) -> usize {
			0
		}
	}

	#[test]
	fn unknown_handle_is_rejected() {
		let mux = Mux::new(Box::new(NullLink), true);
		let table = ChannelTable::new(mux);
		assert!(matches!(table.get(42), Err(Error::InvalidArgument)));
		assert!(matches!(table.close(42), Err(Error::InvalidArgument)));
	}
}
