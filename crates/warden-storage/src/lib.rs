// Storage layer for the Warden kernel
// Decision: One KernelStore trait covering every entity so the kernel services
//           are generic over in-memory (tests) and PostgreSQL (production)

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::InMemoryKernelStore;
pub use postgres::PostgresKernelStore;
pub use store::{
    CommandFilter, EventFilter, HeartbeatUpdate, InstanceFilter, KernelStore, Page, Pagination,
    ResultHistoryEntry, StoreError,
};
