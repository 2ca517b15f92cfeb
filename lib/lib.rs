pub mod build_info;
pub mod cli;
pub mod config;
pub mod db;
pub mod endpoints;
pub mod logging;
pub mod record;
pub mod server;
pub mod state;
pub mod store;
pub mod sync_service;
