mod config;
mod error;
mod target;
mod types;
pub mod helpers;

pub use config::*;
pub use error::*;
pub use target::*;
pub use types::*;
