pub mod api;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod http;
pub mod idempotency;
pub mod metrics;
pub mod models;
pub mod security;
pub mod session;
pub mod supabase;
