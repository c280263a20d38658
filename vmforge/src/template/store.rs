//! Template persistence seam.

use super::{TemplateId, TemplateRecord, TemplateSpec};
use vmforge_shared::ForgeResult;

/// Storage for persisted templates.
///
/// Records are immutable once saved. Names are not unique: each `save`
/// creates a new record with a fresh id. Instance-name uniqueness is enforced
/// by the planner, not here.
pub trait TemplateStore: Send + Sync {
    /// Validate and persist a named copy of `spec`.
    fn save(&self, name: &str, spec: &TemplateSpec) -> ForgeResult<TemplateRecord>;

    /// Load a record. `NotFound` if the id does not resolve, `CorruptRecord`
    /// if the stored spec cannot be turned back into a valid spec.
    fn load(&self, id: &TemplateId) -> ForgeResult<TemplateRecord>;

    /// All readable records in storage order. Corrupt records are skipped
    /// with a warning.
    fn list(&self) -> ForgeResult<Vec<TemplateRecord>>;

    /// Remove a record. `NotFound` if the id does not resolve.
    fn delete(&self, id: &TemplateId) -> ForgeResult<()>;
}
