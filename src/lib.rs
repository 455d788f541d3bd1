pub mod aggregation;
pub mod analysis;
pub mod capacity;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod index;
pub mod overlay;
pub mod projection;
pub mod repository;
pub mod stats;
pub mod types;
