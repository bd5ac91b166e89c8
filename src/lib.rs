//! A pixelflut flooding client: converts images into pixel-set commands and
//! keeps them saturating the server over many parallel connections, with an
//! interactive REPL and an optional controller/worker fleet mode.
pub mod app;
pub mod args;
pub mod canvas;
pub mod config;
pub mod entry;
pub mod error;
pub mod flut;
pub mod logger;
pub mod repl;
pub mod rpc;
pub mod shutdown;
