use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing filename")]
    MissingFilename,

    #[error("Filename too long: {length} characters (max: {max_length})")]
    FilenameTooLong { length: usize, max_length: usize },

    #[error("Invalid file type: {content_type}")]
    InvalidFileType { content_type: String },
}

#[derive(Debug, Clone)]
pub struct FileValidationConfig {
    /// Empty means every content type is accepted.
    pub allowed_content_types: HashSet<String>,
    pub max_filename_length: usize,
}

impl Default for FileValidationConfig {
    fn default() -> Self {
        Self {
            allowed_content_types: HashSet::new(),
            max_filename_length: 255,
        }
    }
}

#[derive(Clone)]
pub struct FileValidator {
    config: FileValidationConfig,
}

impl FileValidator {
    pub fn new(config: FileValidationConfig) -> Self {
        Self { config }
    }

    pub fn with_default_config() -> Self {
        Self::new(FileValidationConfig::default())
    }

    /// Validates upload metadata and returns the sanitized filename.
    pub fn validate_upload(&self, filename: &str, content_type: &str) -> Result<String, ValidationError> {
        let filename = sanitize_filename(filename);
        if filename.is_empty() {
            return Err(ValidationError::MissingFilename);
        }

        let length = filename.chars().count();
        if length > self.config.max_filename_length {
            return Err(ValidationError::FilenameTooLong {
                length,
                max_length: self.config.max_filename_length,
            });
        }

        self.validate_content_type(content_type)?;

        Ok(filename)
    }

    fn validate_content_type(&self, content_type: &str) -> Result<(), ValidationError> {
        if self.config.allowed_content_types.is_empty() {
            return Ok(());
        }

        let essence = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();

        if self.config.allowed_content_types.contains(&essence) {
            Ok(())
        } else {
            Err(ValidationError::InvalidFileType {
                content_type: content_type.to_string(),
            })
        }
    }
}

/// Keeps only the final path component and drops control characters and
/// quotes, which would otherwise leak into `Content-Disposition`.
pub fn sanitize_filename(filename: &str) -> String {
    let last = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect();

    let cleaned = cleaned.trim();
    if cleaned == "." || cleaned == ".." {
        return String::new();
    }
    cleaned.to_string()
}

/// Falls back to a guess from the extension when the client sent nothing
/// useful.
pub fn resolve_content_type(filename: &str, declared: Option<&str>) -> String {
    match declared.map(str::trim) {
        Some(ct) if !ct.is_empty() && ct != mime::APPLICATION_OCTET_STREAM.as_ref() => ct.to_string(),
        _ => mime_guess::from_path(Path::new(filename))
            .first_or_octet_stream()
            .to_string(),
    }
}
