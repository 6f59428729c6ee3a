//! Access-signature generation for emulated resources.

mod sas;

pub use sas::*;
