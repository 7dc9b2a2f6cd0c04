//! HTTP service mocks for API tests.
//!
//! A [`Mocks`] registry holds one [`ServiceMock`] per external service. Each mock
//! serves a tree of [`Definition`]s: request constraints checked on every call, a
//! reply strategy that may dispatch to child definitions, and an optional expected
//! call count. Failures are collected rather than raised and are returned by
//! [`Mocks::end_running_context`] once the test case is over.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use rift_apitest::mocks::{Loader, Mocks};
//!
//! let mocks = Mocks::new_nop(["payments"]);
//! mocks.start().await?;
//! Loader::new(&mocks).load_yaml("payments: {strategy: constant, body: ok, calls: 1}")?;
//!
//! mocks.reset_running_context();
//! // ... drive the system under test ...
//! for error in mocks.end_running_context() {
//!     eprintln!("{error}");
//! }
//! # Ok(())
//! # }
//! ```

mod constraint;
mod definition;
mod error;
mod loader;
mod registry;
mod reply;
mod request;
mod service;
mod template;

pub use constraint::{ConstraintBuildError, RequestConstraint};
pub use definition::Definition;
pub use error::{ConstraintViolation, LoadError, MockError, ServerError, ServiceError};
pub use loader::{load_constraint, load_definition, Loader};
pub use registry::Mocks;
pub use reply::{ConstantReply, ReplyStrategy, UriVariant};
pub use request::{parse_query_values, MockRequest, MockResponse};
pub use service::ServiceMock;
pub use template::{TemplateRenderError, TemplateReply};
