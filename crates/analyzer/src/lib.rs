pub mod autoscaler;
pub mod client;
pub mod pool;
pub mod runtime;

pub use client::CoordinatorClient;
pub use pool::AnalyzerPool;
