//! wsm command line: configuration, logging and the HTTP/push server
//! around a [`wsm::SessionManager`].

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
