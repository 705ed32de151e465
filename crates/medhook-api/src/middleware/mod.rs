//! Request middleware for the medhook API.

pub mod tenant;

pub use tenant::{tenant_middleware, TENANT_HEADER};
