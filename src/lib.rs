// src/lib.rs

pub mod api_client;
pub mod config;
pub mod directory;
pub mod error;
pub mod export;
pub mod model;
pub mod stats;
pub mod workbook;

pub use error::AppError;
