pub mod config;
pub mod error;
pub mod favorites;
pub mod prefetch;
pub mod rawg;
