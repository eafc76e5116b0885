//! Protocol module - HECI register, framing and MKHI definitions.

pub mod constants;
pub mod csr;
pub mod header;

pub use constants::*;
pub use csr::HeciCsr;
pub use header::{HeaderError, HeciMessageHeader, MkhiHeader};
