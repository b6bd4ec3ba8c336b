pub mod bulk;
pub mod cancel;
pub mod codegen;
pub mod config;
pub mod error;
pub mod models;
pub mod ownership;
pub mod password;
pub mod query;
pub mod redirect;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod usage;
pub mod validation;

pub use bulk::BulkEngine;
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use error::{ConflictKind, Error, Result};
pub use query::QueryEngine;
pub use redirect::{RedirectOutcome, RedirectResolver};
pub use store::ShortUrlStore;
