//! Host networking for the communicator port forward.

pub mod port;

pub use port::{PortAllocator, PortLease};
