//! Control-plane client and wire types.

pub mod client;
pub mod types;

pub use client::{CloudClient, CloudClientOptions};
pub use types::StringOrNumber;
