pub mod config;
pub mod error;
pub mod text;
pub mod types;

pub use config::{Config, DigestSettings};
pub use error::{DigestError, Result};
pub use types::*;
