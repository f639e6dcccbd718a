//! Core of the database service: name grammar, passcodes, the registry of
//! named stores, substring search and durable JSON persistence.
//! - Independent of the web framework; the server crate only maps results to HTTP.
//! - Every registry operation flushes state before it returns.

pub mod errors;
pub mod names;
pub mod credentials;
pub mod query;
pub mod registry;
pub mod storage;
pub mod runtime;

pub use errors::ServiceError;
pub use registry::{CreatedDatabase, DatabaseRegistry, RegistryOptions};
