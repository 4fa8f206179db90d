//! Realtime gateway: session multiplexing, rooms, event dispatch, and
//! heartbeat plumbing.
//!
//! The wire transport itself (the actual socket framing) is outside this
//! core's scope; this module is everything the
//! transport calls into once a session and its inbound JSON frames are
//! available: session registration, room membership, and the event ->
//! `MatchManager` dispatch table.

pub mod dispatch;
pub mod events;
pub mod session;

pub use dispatch::Gateway;
pub use events::{ClientEvent, GameResultPayload, ServerEvent};
pub use session::SessionTable;
