//! Routegate - A path-prefix reverse proxy
//!
//! This library provides a reverse proxy that:
//! - Routes HTTP traffic to backend groups based on the request path prefix
//! - Picks a backend from the group in round-robin order
//! - Buffers each backend response and rewrites its body with literal
//!   token substitutions before relaying it
//! - Answers routing failures with `400 Not Found` and every downstream
//!   failure with `502 Bad Gateway`

pub mod client;
pub mod config;
pub mod error;
pub mod loadbalancer;
pub mod proxy;
pub mod rewrite;
pub mod routes;
