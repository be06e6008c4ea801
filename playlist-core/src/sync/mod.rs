//! Sync Protocol
//!
//! Wire messages and the per-role session state built on them.

mod protocol;
mod state;

pub use protocol::*;
pub use state::*;
