pub mod board;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod logging;
pub mod objects;
pub mod server;
pub mod sync;
pub mod types;
