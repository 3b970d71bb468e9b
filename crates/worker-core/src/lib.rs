pub mod config;
pub mod error;
pub mod ram;
pub mod vector;

pub use config::NodeConfig;
pub use error::{EngineError, SessionError, StartupError};
pub use ram::RamReservation;
