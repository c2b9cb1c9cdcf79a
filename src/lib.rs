pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod global;
pub mod invite;
pub mod platform;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod summary;
pub mod transcription;
