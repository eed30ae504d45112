//! Host TCP port reservations shared by every machine process on the host.

mod allocator;
mod error;

pub use allocator::{
    MAX_RETRIES, PORT_ALLOC_FILE, PORT_LOCK_FILE, PortAllocator, is_locally_available,
};
pub use error::PortError;
