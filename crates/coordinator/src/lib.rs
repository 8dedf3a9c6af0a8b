pub mod backlog;
pub mod monitor;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::QueueState;
