//! Pool module - concurrent audio-feature fetching.

mod fetcher;

pub use fetcher::*;
