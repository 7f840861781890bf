//! MCP (Model Context Protocol) server
//!
//! JSON-RPC 2.0 over stdio or HTTP. No external SDK - blocking I/O,
//! one method dispatcher shared by both transports.

pub mod http;
pub mod microserver;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod stdio;

pub use server::{LogicServer, PROTOCOL_VERSION, SERVER_NAME};
