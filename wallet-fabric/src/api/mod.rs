pub mod server;
pub mod types;

pub use server::{create_router, run_server, ApiError};
