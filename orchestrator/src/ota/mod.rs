//! Wireless (OTA) delivery

pub mod fsm;
pub mod progress;
pub mod session;
