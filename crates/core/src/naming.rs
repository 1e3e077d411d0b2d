//! Model name validation.
//!
//! Model names double as directory names under the model store root, so a
//! valid name must be a single path component.

use crate::error::CoreError;

/// Maximum length of a model name in bytes (common filesystem limit).
const MAX_NAME_LEN: usize = 255;

/// Extension expected on uploaded model archives.
pub const ARCHIVE_EXTENSION: &str = ".zip";

/// Validate a model (or archive) name.
///
/// Rules:
/// - Must not be empty or whitespace only.
/// - Must not exceed `MAX_NAME_LEN` bytes.
/// - Must not contain path separators, NUL, or be `.` / `..`.
pub fn validate_model_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation(
            "Model name is invalid or missing".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Model name must not exceed {MAX_NAME_LEN} bytes"
        )));
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(CoreError::Validation(format!(
            "Model name '{name}' must be a single path component"
        )));
    }
    Ok(())
}

/// Directory name an archive extracts into: the filename minus `.zip`.
///
/// ```
/// use modelhub_core::naming::archive_stem;
///
/// assert_eq!(archive_stem("llama3.zip"), "llama3");
/// assert_eq!(archive_stem("llama3"), "llama3");
/// ```
pub fn archive_stem(filename: &str) -> &str {
    filename
        .strip_suffix(ARCHIVE_EXTENSION)
        .unwrap_or(filename)
}
