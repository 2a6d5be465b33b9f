//! Debug Adapter Protocol messages used by the breakpoint subsystem.
//!
//! Only the slice of the protocol that touches breakpoints is modelled here:
//! the set-breakpoint requests, `configurationDone`, `continue`, and the
//! `breakpoint`, `stopped` and `output` events.

pub mod events;
pub mod requests;
pub mod types;

pub use events::Event;
pub use types::*;
