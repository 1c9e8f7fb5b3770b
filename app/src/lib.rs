pub mod server;

pub use server::{router, serve, serve_on, AppError, ServerState};
