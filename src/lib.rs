pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod services;
pub mod store;
pub mod tools;
pub mod utils;

pub use error::ClinicError;
