pub mod call;
pub mod events;

pub use call::{CallDirection, CallId, CallState, CauseCode, GatewayState, TerminationReason};
pub use events::{DisconnectReason, Event, EventHandler};
