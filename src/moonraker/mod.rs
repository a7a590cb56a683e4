//! Local printer-service (Moonraker) client.

pub mod client;

pub use client::MoonrakerClient;
