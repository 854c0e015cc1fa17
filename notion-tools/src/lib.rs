//! Notion tools gated by pagegate.
//!
//! Five operations (create, retrieve, update pages; list pages; append
//! content) that run against the Notion API with the calling agent's own
//! access token.

pub mod client;
pub mod config;
pub mod operations;

pub use client::NotionClient;
pub use operations::notion_operations;
