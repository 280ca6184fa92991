// Middleware for resilient service calls
//
// Circuit breaking for remote capabilities and per-caller admission control

pub mod circuit_breaker;
pub mod rate_limiter;

// Re-export commonly used types
pub use circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use rate_limiter::RateLimiter;
