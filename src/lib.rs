//! Declarative HTTP integration and load testing.
//!
//! A [`test::Test`] is a request plus a list of [`checks::Check`]
//! assertions and [`extractor::Extractor`] extractions. Tests are
//! grouped into suites with Setup, Main and Teardown phases
//! ([`suite`]), can expect calls to ephemeral [`mock`] servers, share
//! values through layered [`scope`] variables and drive throughput
//! workloads via [`load`].
//!
//! Requests are dispatched by URL scheme through [`adapter`]: plain
//! `http(s)` plus the pseudo schemes `file://`, `bash://` and `sql://`.

pub mod adapter;
pub mod checks;
pub mod condition;
pub mod extractor;
pub mod html;
pub mod img;
pub mod json;
pub mod latency;
pub mod load;
pub mod mock;
pub mod raw;
pub mod request;
pub mod scope;
pub mod status;
pub mod suite;
pub mod test;
pub mod utils;
pub mod xml;

pub use checks::{Check, CheckError, CheckResult};
pub use condition::Condition;
pub use extractor::{Extractor, ExtractorMap};
pub use request::{Request, Response};
pub use scope::Variables;
pub use status::{Criticality, Status};
pub use test::{Execution, Test, TestResult};
