pub mod error;
pub mod rest;
mod router;
mod state;
pub mod ws;

pub use router::build_router;
pub use state::AppState;
