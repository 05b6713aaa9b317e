mod client;
mod common;
mod keys;

pub use client::*;
pub use common::*;
pub use keys::load_private_key;
