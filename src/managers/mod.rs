pub mod coordinator;
pub mod runner;
pub mod transfer;
pub mod transport;
