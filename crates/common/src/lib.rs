//! Common types shared by the queue client crates

mod clock;
mod error;
mod secret;

pub use clock::unix_now;
pub use error::{Error, Result};
pub use secret::Secret;
