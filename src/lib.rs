pub mod cli;
pub mod server;
pub mod supervisor;
pub mod telemetry;
