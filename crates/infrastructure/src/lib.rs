//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod clock;
mod in_memory_lease_store;
mod postgres_lease_store;
mod redis_lease_store;

pub use clock::{ManualClock, SystemClock};
pub use in_memory_lease_store::InMemoryLeaseStore;
pub use postgres_lease_store::PostgresLeaseStore;
pub use redis_lease_store::RedisLeaseStore;
