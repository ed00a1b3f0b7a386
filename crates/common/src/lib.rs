//! Types shared by the EventSub relay crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
