//! Pickup Winder Library
//!
//! Serial control of the hexaphonic pickup winder firmware: motor
//! enable/disable, speed, and the revolution counter.

pub mod commands;
pub mod config_loader;
pub mod error;
pub mod sim;
pub mod transport;
pub mod winder;

pub use commands::{Command, Message, Speed};
pub use error::{Result, WinderError};
pub use transport::{PortSelector, SerialTransport, Transport};
pub use winder::{Winder, WinderConfig};
