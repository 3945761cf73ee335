//! Shared types for the Frame artwork sync daemon: configuration, the
//! now-playing and cover-art HTTP clients, and the television's art-channel
//! wire format.

pub mod config;
pub mod cover;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod track;
