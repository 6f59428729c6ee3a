//! Value types exchanged with callers of the emulators.

mod blob;
mod queue;
mod sas;

pub use blob::*;
pub use queue::*;
pub use sas::*;
