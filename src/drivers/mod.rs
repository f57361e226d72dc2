//! Driver-level modules. The only driver this crate ships is the TS 27.010
//! multiplexer engine itself; [`mux`] holds the wire codec, state machine,
//! and worker loop that make it up.

pub mod mux;
