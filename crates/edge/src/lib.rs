pub mod cli;
pub mod db;

mod error;

pub use error::Error;
