//! Sketch build and deploy orchestrator
//!
//! Submits sketches for remote compilation, follows the compiler output
//! stream, and delivers the binary over a wired agent, a serial bridge or an
//! OTA update.

pub mod app;
pub mod compile;
pub mod console;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod notify;
pub mod ota;
pub mod readiness;
pub mod server;
pub mod session;
pub mod status;
pub mod storage;
pub mod transport;
pub mod utils;
pub mod workers;
