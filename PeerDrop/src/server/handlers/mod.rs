//! Handlers for relay protocol messages.

pub mod forward;
pub mod register;

mod context;
pub use context::{dispatch, ConnectionContext};
