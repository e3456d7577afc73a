pub mod config;
pub mod errors;
pub mod model;
pub mod services;
pub mod storage;

pub use config::StoreConfig;
pub use errors::{StoreError, StoreResult};
pub use model::{Collection, DocumentId, Lookup, NotFound, Source};
pub use services::ServiceFactory;
