pub mod buffer;
pub mod composer;
pub mod config;
pub mod configuration;
pub mod error;
pub mod io;
pub mod job;
pub mod model;
pub mod paths;
pub mod progress;
pub mod sampling;
pub mod types;
pub mod worker;
pub mod workspace;

pub use error::{ProdlineError, Result};
