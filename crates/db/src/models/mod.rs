pub mod artifact;
pub mod collection;
pub mod composite;
pub mod context_module;
pub mod deployment;
pub mod deployment_set;
pub mod group;
pub mod memory_item;
pub mod project;
pub mod snapshot;

/// True when the error is a unique-constraint violation, used by create
/// paths that surface `Conflict(existing)` for idempotent import.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
