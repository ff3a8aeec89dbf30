//! Classification service client module.

mod llm_client;
mod rate_limiter;
mod service;

pub use llm_client::*;
pub use rate_limiter::*;
pub use service::*;
