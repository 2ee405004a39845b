//! procwatch: process inventory and lifecycle control over HTTP

pub mod collector;
pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod inventory;
pub mod protocol;
pub mod server;
pub mod sockets;
