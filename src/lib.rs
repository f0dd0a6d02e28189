pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod schema;
pub mod store;

pub use error::{Error, Result};
