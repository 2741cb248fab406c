//! Shared infrastructure utilities for Warden.
//!
//! This crate provides cross-cutting utilities that multiple Warden crates need
//! but that don't belong in the domain-pure `warden-types` crate:
//!
//! - **`atomic_write`**: Crash-safe file replacement with a restorable backup
//! - **`security`**: Secret redaction and sanitization for display

pub mod atomic_write;
pub mod security;

pub use atomic_write::{
    atomic_write, backup_path_for, backups_for, restore_backup, restore_latest_backup,
    write_with_backup,
};
pub use security::{redact_api_keys, sanitize_display_text};
