//! Spotify Web API client module.

mod rate_limiter;
mod spotify;

pub use rate_limiter::*;
pub use spotify::*;
