//! Background workers

pub mod ota_poller;
pub mod reconnect;
