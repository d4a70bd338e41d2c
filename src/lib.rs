pub mod api;
pub mod app;
pub mod clients;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod fanout;
pub mod gateway;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod rate_limit;
pub mod render;
pub mod senders;
pub mod utils;
