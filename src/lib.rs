//! Registrar - identifier assignment and reconciliation for content records.
//!
//! Registrar keeps one field per content type (the "monitored field")
//! holding a unique, well-formed identifier. It guards every write, finds
//! and repairs bad state in bulk, and carries identifier mappings across
//! environments.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           API (axum)                            │
//! │  health, check-duplicate, diagnose, fix, migration, content     │
//! └───────────────┬──────────────────────────────┬──────────────────┘
//!                 │ writes                       │ bulk
//! ┌───────────────┴───────────────┐ ┌────────────┴──────────────────┐
//! │  Repository + WriteGuard      │ │  Reconciler    Snapshots      │
//! │  (pre-commit lifecycle hook)  │ │  (diagnose/fix, export/import)│
//! └───────────────┬───────────────┘ └────────────┬──────────────────┘
//!                 │        Allocator + Oracle    │
//! ┌───────────────┴──────────────────────────────┴──────────────────┐
//! │                        RecordStore                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Properties
//!
//! - **Uniqueness**: no two record identities hold the same value after any
//!   successful write or repair
//! - **Revision aware**: rows sharing a record identity never count as
//!   duplicates of each other
//! - **Dry-run fidelity**: a dry run logs exactly the changes a live run
//!   would make

// === Core Modules ===

/// Value generation and layout checks.
pub mod identifier;

/// Monitored field discovery.
pub mod registry;

/// Record storage and lifecycle hooks.
pub mod store;

/// Uniqueness lookups.
pub mod oracle;

/// Write-time policy.
pub mod guard;

/// Bulk diagnosis and repair.
pub mod reconcile;

/// Export and import of mappings.
pub mod snapshot;

// === Service ===

/// Configuration file.
pub mod config;

/// Admin token.
pub mod auth;

/// REST API.
pub mod api;

/// Startup reconciliation.
pub mod worker;

// === Re-exports ===

pub use config::{Config, ConfigError};
pub use guard::{Allocator, GuardError, WriteGuard};
pub use identifier::{IdentifierSource, RandomSource, SeededSource, UuidVersion};
pub use oracle::{Ownership, UniquenessOracle};
pub use reconcile::{DiagnosisReport, FixOptions, ReconciliationResult, Reconciler};
pub use registry::{FieldRegistry, MonitoredField};
pub use snapshot::{ExportSnapshot, ImportOptions, ImportResult, Snapshots};
pub use store::{MemoryStore, RecordIdentity, RecordStore, Repository, RowId, StoredRecord};
