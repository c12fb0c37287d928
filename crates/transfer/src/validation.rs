use std::path::{Component, Path};

use crate::TransferError;

/// Validates that a record id can be used as a single file name.
///
/// Staged copies are stored as `<staging_dir>/<id>.stage`, so an id must stay
/// inside the staging directory. Rejects:
/// - Empty ids
/// - Path separators (`/`, `\`)
/// - `.` and `..`
/// - Anything that is not exactly one normal path component
pub fn validate_record_id(id: &str) -> Result<(), TransferError> {
    if id.is_empty() {
        return Err(TransferError::InvalidRecordId("empty id".into()));
    }

    if id.contains('/') || id.contains('\\') {
        return Err(TransferError::InvalidRecordId(format!(
            "path separator not allowed: {id}"
        )));
    }

    let mut components = Path::new(id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidRecordId(format!(
            "not a plain file name: {id}"
        ))),
    }
}
