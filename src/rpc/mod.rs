//! Coordination control plane: a controller ("Rán") drives a fleet of
//! workers ("Hevring") that each run their own local flood.
mod controller;
mod protocol;
mod wire;
mod worker;


pub use controller::{Controller, run_controller};
pub use protocol::WorkerStatus;
pub use worker::run_worker;
