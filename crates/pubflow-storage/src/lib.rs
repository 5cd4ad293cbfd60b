//! Object-store facade for pubflow.
//!
//! Components address objects as `scheme://bucket/key` and speak to a
//! [`ObjectStore`](store::ObjectStore) trait; deployments plug in the S3
//! provider while tests run against the in-memory store. The [`outbox`]
//! module layers the deposit pipelines' outbox/published folder contract on
//! top.

pub mod address;
pub mod memory;
pub mod outbox;
pub mod s3;
pub mod store;

pub use address::StorageAddress;
pub use memory::InMemoryObjectStore;
pub use outbox::Outbox;
pub use store::{ObjectStore, StorageError};
