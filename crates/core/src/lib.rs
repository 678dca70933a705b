pub mod config;
pub mod document;
pub mod error;

pub use config::{load_dotenv, ElasticConfig, RollupConfig, DEFAULT_IN_HOST};
pub use document::*;
pub use error::*;
