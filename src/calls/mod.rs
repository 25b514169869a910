//! Call lifecycle on top of the signaling session.
//!
//! # Architecture
//!
//! - [`CallInfo`] & [`CallTransition`]: per-call state machine
//! - [`CallManager`]: the call table; turns signaling into consumer events
//! - [`CallError`]: failures of consumer call actions
//!
//! Call state is driven only by signaling. Media (SDP) is passed through
//! untouched.

mod error;
mod manager;
mod state;

pub use error::CallError;
pub(crate) use manager::CallManager;
pub use manager::CallOptions;
pub use state::{CallInfo, CallTransition, InvalidTransition};
