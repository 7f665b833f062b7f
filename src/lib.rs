//! Kaisy — a Feishu (Lark) adapter for an agent message bus.
//!
//! Single Rust binary. Normalizes inbound chat-platform events into a
//! canonical message model, pushes them onto the bus, and dispatches agent
//! replies back onto the platform.
//!
//! See `DESIGN.md` for full architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod message;

pub mod feishu;

pub mod bus;
pub mod gate;
pub mod inbound;
pub mod outbound;
pub mod supervisor;
