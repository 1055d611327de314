//! Pull relays: definitions, registry, reconnection scheduling and the
//! per-attempt connection worker.

pub mod chunk;
pub mod connection;
pub mod descriptor;
pub mod handshake;
pub mod ingest;
pub mod parse;
pub mod registry;
pub mod request;
pub mod scheduler;
pub mod transport;
pub mod worker;

pub use connection::{ConnectionHandle, RelayConnection};
pub use descriptor::{AttemptToken, NtripVersion, RelayDescriptor, RelayKey, RelayMode};
pub use ingest::Ingest;
pub use parse::parse_relay_spec;
pub use registry::RelayRegistry;
pub use request::RequestDescriptor;
pub use scheduler::RelayScheduler;
pub use transport::{BoxedStream, Connector, TcpConnector};
pub use worker::ConnectionWorker;
