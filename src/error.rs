use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum AppError {
    /// Library root is unset, missing or not a directory.
    #[error("Library not available: {0}")]
    NotAvailable(String),

    /// Content hash is already catalogued.
    #[error("Document already exists (hash {0})")]
    Duplicate(String),

    /// Resource not found error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Business rule rejection.
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// Invalid format error.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(String),

    /// XML parsing error.
    #[error("XML parsing error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Image processing error.
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation was cancelled before completion.
    #[error("Operation cancelled")]
    Cancelled,

    /// Worker queue is full.
    #[error("Worker queue full ({0} pending tasks)")]
    Busy(usize),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether this error means "already present" rather than a failure.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppError::Duplicate(_))
    }
}

/// Result type alias for the library.
pub type Result<T> = std::result::Result<T, AppError>;
