//! User sessions: per-user state, the shared store and the idle reaper.

mod reaper;
mod state;
mod store;

pub use reaper::SessionReaper;
pub use state::{BatchGuard, Session, SessionState, SessionStatus, UserId};
pub use store::{BatchLease, SessionStore};
