/// Why an uploaded filename was rejected.
#[derive(Debug, PartialEq, Eq)]
pub enum ObjectNameError {
    Empty,
    TooLong,
    PathSeparator,
    Traversal,
    Hidden,
    ControlCharacter,
    /// `.meta.json` is the sidecar suffix; a primary object named that way
    /// would be shadowed by refreshes and skipped by storage sync.
    ReservedSidecarSuffix,
    /// `::` delimits the ticket uuid from the object key.
    TicketSeparator,
}

impl ObjectNameError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "filename must not be empty",
            Self::TooLong => "filename exceeds 255 bytes",
            Self::PathSeparator => "filename must not contain path separators",
            Self::Traversal => "filename must not be '..'",
            Self::Hidden => "filename must not start with '.'",
            Self::ControlCharacter => "filename must not contain control characters",
            Self::ReservedSidecarSuffix => "the '.meta.json' suffix is reserved for sidecars",
            Self::TicketSeparator => "filename must not contain '::'",
        }
    }
}

/// Longest filename accepted into an object key. Matches the common
/// object-store key-segment limit.
pub const MAX_FILENAME_LEN: usize = 255;

/// Validate a filename before it becomes the last segment of an object key
/// (`resources/<type>/<uuid>/<filename>`).
///
/// Beyond path hygiene, two constraints are specific to this layout: the
/// `.meta.json` suffix belongs to sidecars, and `::` is the ticket
/// delimiter, kept out of keys so `{uuid}::{object_key}` tickets stay
/// trivially splittable for clients.
pub fn validate_object_filename(filename: &str) -> Result<&str, ObjectNameError> {
    let name = filename.trim();

    if name.is_empty() {
        return Err(ObjectNameError::Empty);
    }
    if name.len() > MAX_FILENAME_LEN {
        return Err(ObjectNameError::TooLong);
    }
    // Null bytes are control characters; one check covers both, and keeps
    // CRLF out of anything later echoed into HTTP headers.
    if name.chars().any(|c| c.is_ascii_control()) {
        return Err(ObjectNameError::ControlCharacter);
    }
    if name.contains(['/', '\\']) {
        return Err(ObjectNameError::PathSeparator);
    }
    if name == ".." {
        return Err(ObjectNameError::Traversal);
    }
    if name.starts_with('.') {
        return Err(ObjectNameError::Hidden);
    }
    if name.ends_with(".meta.json") {
        return Err(ObjectNameError::ReservedSidecarSuffix);
    }
    if name.contains("::") {
        return Err(ObjectNameError::TicketSeparator);
    }

    Ok(name)
}

/// The last path segment of a `/`-separated object key.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}
