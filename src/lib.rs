pub mod config;
pub mod diversity;
pub mod error;
pub mod forecast;
pub mod guard;
pub mod model;
pub mod scanner;
pub mod vector;
