//! HIT audio virtual machine.
//!
//! Runs compiled HIT programs that decide, frame by frame, which sounds and
//! music tracks play for game events. Audio decoding and mixing stay with
//! the host, reached through [`virtual_machine::dispatch::SoundDispatch`].

pub mod types;
pub mod utils;
pub mod virtual_machine;
