//! Parlour is the client-side core of a persona-based AI chat application.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns durable key/value storage, the persona registry with
//!   built-in/override semantics, per-model request throttling, and the chat
//!   session engine that orchestrates send/regenerate/stop with optimistic
//!   updates and rollback.
//! - [`api`] defines the Generation Service wire contract, the model
//!   catalog, and the retrying generation client with cooperative
//!   cancellation.
//! - [`utils`] provides id generation, input validation, and logging setup.
//!
//! Host applications open a [`core::store::Store`], wrap a
//! [`api::client::GenerationClient`] around a transport, and drive
//! everything through [`core::app::ChatApp`], which owns one session per
//! persona and the single user-facing notice channel.

pub mod api;
pub mod core;
pub mod utils;
