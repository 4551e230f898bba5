//! Pipeline module - extraction and enrichment pipelines.

mod enrich;
mod extract;

pub use enrich::*;
pub use extract::*;
