//! HTTP surface for UI collaborators

pub mod routes;

pub use routes::build_router;
