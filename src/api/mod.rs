pub mod cache;
pub mod client;
pub mod endpoints;
pub mod types;

pub use client::{BefaClient, StaticToken, TokenSource};
