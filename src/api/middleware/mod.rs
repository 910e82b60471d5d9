//! HTTP middleware stack: a single HMAC authentication layer.

pub mod auth;
