//! MPD slice scanning - discovery, counting, and catalog extraction.

mod count;
mod slices;

pub use count::*;
pub use slices::*;
