// ntripcaster-relay - pull relay subsystem of the NTRIP caster
//
// Layout:
// - relay/     - descriptors, registry, scheduler, worker, login handshake
// - source     - source table, the default ingestion pipeline
// - admin      - `relay` console command and config directives
// - context    - process-wide caster state shared as Arc<CasterContext>
// - bootstrap  - config discovery and context construction for the binary

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod relay;
pub mod source;

pub use config::{Config, RelaySettings};
pub use context::{AgentInfo, CasterContext};
pub use error::{RelayError, RelayResult};
pub use relay::{RelayDescriptor, RelayRegistry, RelayScheduler};
pub use source::{SourceIngest, SourceTable};
