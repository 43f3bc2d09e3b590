//! Document-store backend

mod eval;
mod http;
mod memory;
mod ops;
mod store;
mod transport;
mod tx;

pub use http::HttpTransport;
pub use memory::MemoryTransport;
pub use store::DocumentStore;
pub use transport::{Document, DocumentRequest, DocumentResponse, DocumentTransport, TransportError};
pub use tx::DocumentTransaction;
