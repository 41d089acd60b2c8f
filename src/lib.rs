//! Client-side dispatch engine for a ZooKeeper-style coordination service.
//!
//! A single backend session delivers every server-originated event through
//! one ordered stream. The engine moves those events onto an [`EventQueue`],
//! drains it on a dedicated dispatch thread and hands each event to the
//! completion or watcher registered under its request id.
//!
//! - [`Connection`] sequences open, close and reopen of the session and its
//!   worker threads
//! - [`Client`] layers the node operations (`get`, `create`, ...) on top
//! - [`backend::Backend`] is the seam to the wire protocol;
//!   [`backend::MemoryBackend`] runs everything in-process

pub mod backend;
mod client;
mod config;
pub mod constants;
mod core;
mod errors;
pub mod metrics;

pub use self::core::*;
pub use client::*;
pub use config::*;
pub use errors::*;

#[cfg(test)]
mod errors_test;
