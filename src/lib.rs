pub mod auth;
pub mod conf;
pub mod data;
pub mod docs;
pub mod jwt;
pub mod live;
pub mod quota;
pub mod reset;
pub mod server;
pub mod store;
pub mod tier;
pub mod tracing;
pub mod trending;
pub mod types;
