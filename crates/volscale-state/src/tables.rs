//! redb table definitions for the volscale state store.
//!
//! Both tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Event keys are `{volume_id}:{timestamp}` so one volume's history
//! is a contiguous prefix scan.

use redb::TableDefinition;

/// Volume records keyed by provider volume id.
pub const VOLUMES: TableDefinition<&str, &[u8]> = TableDefinition::new("volumes");

/// Scaling events keyed by `{volume_id}:{timestamp}`.
pub const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("events");
