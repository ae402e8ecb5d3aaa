pub mod config;
pub mod db;
pub mod error;
pub mod integrations;
pub mod model;
pub mod sync;
pub mod utils;
