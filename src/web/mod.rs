//! HTTP signaling surface

mod handlers;
mod routes;

pub use routes::create_router;
