//! Cloud service clients

pub mod agent;
pub mod builder;
pub mod client;
pub mod iot;
pub mod ota;
