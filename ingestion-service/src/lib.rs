pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
pub mod workers;
