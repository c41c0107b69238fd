//! linekv: a concurrent TCP key-value store speaking newline-delimited JSON.
//!
//! Clients send one JSON object per line: `{"key": K, "value": V}` stores a
//! value, `{"key": K}` retrieves one. Each module covers one responsibility:
//!
//! - [`config`] merges CLI arguments with an optional TOML file.
//! - [`protocol`] frames lines and encodes/decodes request and response JSON.
//! - [`storage`] holds the sharded in-memory keyspace.
//! - [`server`] accepts connections and runs the per-connection loop with
//!   graceful drain on shutdown.
//!
//! Integration tests use this crate directly to exercise the server over
//! real sockets.

pub mod config;
pub mod protocol;
pub mod server;
pub mod storage;
