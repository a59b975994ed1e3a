//! Domain-level building blocks shared across the API, storage and mailer
//! crates: configuration, the article lifecycle, payment tokens, notification
//! rendering and the workflow orchestrator that ties them together.

pub mod config;
pub mod lifecycle;
pub mod model;
pub mod notification;
pub mod services;
pub mod storage;

pub use config::*;
pub use lifecycle::*;
pub use model::*;
pub use notification::*;
pub use services::*;
pub use storage::*;
