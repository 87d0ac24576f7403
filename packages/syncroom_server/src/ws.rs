pub mod api;
pub mod handler;
pub mod server;
