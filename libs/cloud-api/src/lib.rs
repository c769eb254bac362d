//! Wire models for the build, OTA and IoT cloud services.

pub mod models;

pub use models::*;
