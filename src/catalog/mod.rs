//! Marketplace logic that sits between the HTTP surface and the backend.

pub mod autocomplete;
pub mod category;
pub mod debounce;
pub mod filters;
pub mod listings;
pub mod publish;
pub mod sanitize;
