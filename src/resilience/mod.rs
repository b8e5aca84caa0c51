//! Fault-tolerance primitives for remote calls.
//!
//! - `circuit_breaker`: per-dependency breakers and their shared registry
//! - `retry`: bounded exponential backoff policies

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitState,
};
pub use retry::RetryPolicy;
