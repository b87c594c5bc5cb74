//! HTTP surface: the rate-limit middleware, a forward-auth endpoint and the
//! server that hosts them.

mod server;
mod service;
mod state;

pub use server::{router, HttpServer};
pub use service::{
    check, health, rate_limit, CheckRequest, CheckResponse, ErrorResponse, HealthResponse,
    RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET,
};
pub use state::GateState;
