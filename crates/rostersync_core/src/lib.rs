pub mod client;
pub mod config;
pub mod extract;
pub mod list;
pub mod pipeline;
pub mod response;
pub mod rich_text;
pub mod store;
