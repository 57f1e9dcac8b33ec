pub mod config;
pub mod state;
pub mod supervisor;
pub mod telemetry;
pub mod wire;
