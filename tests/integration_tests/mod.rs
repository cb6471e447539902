//! Integration tests for droidpool

mod hub_test;
mod routing_test;
mod session_lifecycle;
