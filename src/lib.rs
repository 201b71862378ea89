pub mod adaptive;
pub mod config;
pub mod db;
pub mod logging;
pub mod workers;

pub use adaptive::{DecisionManager, PersistenceBridge};
pub use config::EngineConfig;
