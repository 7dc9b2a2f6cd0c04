//! Building blocks for declarative HTTP API tests.
//!
//! - [`compare`]: structural comparison of expected and actual JSON-like values
//! - [`xml`]: XML bodies decoded into the same value model
//! - [`mocks`]: HTTP service mocks driven by declarative definitions
//! - [`config`]: configuration file for the `rift-apitest` binary

pub mod compare;
pub mod config;
pub mod mocks;
pub mod xml;
