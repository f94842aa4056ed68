// Data Engine Module
// Engine-neutral access to MySQL and PostgreSQL servers, optionally over SSH

pub mod admin;
pub mod drivers;
pub mod error;
pub mod executor;
pub mod factory;
pub mod registry;
pub mod schema;
pub mod session_manager;
pub mod sql_safety;
pub mod ssh_tunnel;
pub mod traits;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use admin::{AdminArgs, AdminCommand};
pub use error::{ConnectionFailure, EngineError, EngineResult};
pub use executor::QueryExecutor;
pub use factory::ConnectionFactory;
pub use registry::ServerRegistry;
pub use schema::SchemaInspector;
pub use session_manager::{Session, SessionManager};
pub use ssh_tunnel::SshTunnelOpener;
pub use traits::{Connection, DataEngine, Tunnel, TunnelOpener};
pub use types::*;
