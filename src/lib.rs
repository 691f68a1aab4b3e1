pub mod cache;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod fallback;
pub mod geocode;
pub mod keywords;
pub mod matcher;
pub mod models;
pub mod openai;
pub mod parser;
pub mod prompt;
pub mod server;
pub mod service;
pub mod vendors;

pub use config::AppConfig;
pub use server::run_server;
