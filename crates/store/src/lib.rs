//! The persistence driver: JSON-file-backed stores for agents, config
//! versions, approvals, secrets metadata, the runtime KV, and the
//! append-only audit log.
//!
//! Every store loads its file once at construction, holds the working
//! set in memory behind a `parking_lot` lock, and persists after each
//! mutation. A single control-plane instance owns all state, so the
//! locks double as the transactional write path: conflicting writers
//! serialise on the lock and observe each other's committed state.

pub mod agents;
pub mod approvals;
pub mod audit;
pub mod diff;
pub mod kv;
pub mod secrets;
pub mod versions;

pub use agents::AgentStore;
pub use approvals::ApprovalStore;
pub use audit::AuditLog;
pub use kv::KvStore;
pub use secrets::{SecretRecord, SecretStore};
pub use versions::{ConfigVersion, VersionStore, WriteOutcome};
