//! Types shared between the vmforge library and its front ends.

pub mod errors;

pub use errors::{ForgeError, ForgeResult};
