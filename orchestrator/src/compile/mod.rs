//! Remote compilation: job lifecycle, output stream and build artifact

pub mod artifact;
pub mod diagnostics;
pub mod fsm;
pub mod job;
pub mod stream;
