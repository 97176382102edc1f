pub mod auth;
pub mod contacts;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod notify;
pub mod routes;
pub mod state;
