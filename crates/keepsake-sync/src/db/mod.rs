//! Durable local storage layer

mod connection;
mod migrations;

pub use connection::Database;
