pub mod ai;
pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod db;
pub mod events;
pub mod pipeline;
pub mod platform;
pub mod sheet;
