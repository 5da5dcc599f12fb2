pub mod config;
pub mod constants;
pub mod db;
pub mod logging;
pub mod memory;
pub mod meta;
pub mod models;
pub mod normalize;
pub mod service;
pub mod stats;
pub mod store;
pub mod sync;
