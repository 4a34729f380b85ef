//! Entity graph and domain logic for the tideframe protocol.
//!
//! This crate holds the in-memory model the server mutates: users and
//! groups with their ACL, property and roster sets, password hashing, and
//! the keepalive state machine. None of it performs I/O: persistence is
//! write-through via [`store::StoreSink`] (an unbounded queue the server's
//! persister task drains), and all graph mutation happens on the server's
//! single event loop, so no type here needs interior locking.

pub mod acl;
pub mod auth;
pub mod errors;
pub mod group;
pub mod keepalive;
pub mod property;
pub mod roster;
pub mod store;
pub mod user;

pub use errors::{AclError, CommandError, GroupError, PropertyError, UserError};
pub use group::Group;
pub use store::{StoreOp, StoreSink};
pub use user::User;

/// Identity of one live connection; a user may hold several.
pub type SessionId = u64;

/// Seconds since the Unix epoch.
///
/// Every persisted entity carries its creation time in this form.
pub fn unix_time() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
