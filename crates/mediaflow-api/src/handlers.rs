//! Request handlers.

pub mod health;
pub mod media;

pub use health::*;
pub use media::*;
