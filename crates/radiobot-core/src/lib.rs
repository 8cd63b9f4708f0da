//! Announces now-playing changes from an internet radio status feed in a
//! Matrix room.

pub mod bridge;
pub mod change;
pub mod config;
pub mod matrix;
pub mod platform;
pub mod poll;
pub mod session;
pub mod status;
