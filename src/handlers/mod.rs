//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, headers)
//! 2. Delegates to the transfer service
//! 3. Returns HTTP response (JSON, status code)

/// Health check endpoint
pub mod health;

/// Transfer submission and query endpoints
pub mod transfers;
