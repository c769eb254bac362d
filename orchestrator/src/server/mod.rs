//! Local HTTP surface of the daemon

pub mod handlers;
pub mod serve;
pub mod state;
