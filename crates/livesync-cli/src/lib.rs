//! LiveSync demo chat client
//!
//! A terminal front end for a `listMessages` / `sendMessage` chat backend, built on
//! [`livesync_runtime`] with the WebSocket transport from [`livesync_ws`].

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod message;
