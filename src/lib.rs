pub mod auth;
pub mod config;
pub mod email;
pub mod notify;
pub mod shared;
pub mod tickets;
