//! Stream path parsing: `<project>/<stream>`.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("missing project or stream id")]
    MissingSegment,
    #[error("invalid path segment: {0}")]
    InvalidSegment(String),
}

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':' | b'.'))
}

/// A validated `<project>/<stream>` path; also the per-stream engine key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamPath {
    project: String,
    stream: String,
}

impl StreamPath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let raw = raw.trim_start_matches('/');
        let mut parts = raw.splitn(2, '/');
        let project = parts.next().unwrap_or("");
        let stream = parts.next().unwrap_or("");

        if project.is_empty() || stream.is_empty() {
            return Err(PathError::MissingSegment);
        }
        if !is_valid_segment(project) {
            return Err(PathError::InvalidSegment(project.to_string()));
        }
        if !is_valid_segment(stream) {
            return Err(PathError::InvalidSegment(stream.to_string()));
        }
        Ok(Self {
            project: project.to_string(),
            stream: stream.to_string(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Build the sibling estuary sink path `<project>/<estuary_id>`.
    pub fn sink(project: &str, estuary_id: &str) -> Result<Self, PathError> {
        Self::parse(&format!("{project}/{estuary_id}"))
    }
}

impl fmt::Display for StreamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_project_and_stream() {
        let p = StreamPath::parse("acme/orders").unwrap();
        assert_eq!(p.project(), "acme");
        assert_eq!(p.stream(), "orders");
        assert_eq!(p.to_string(), "acme/orders");
    }

    #[test]
    fn allows_nested_stream_segment_as_literal_chars() {
        // streams may contain ':' and '.' and '-' but not '/'
        let p = StreamPath::parse("acme/orders:created.v1").unwrap();
        assert_eq!(p.stream(), "orders:created.v1");
    }

    #[test]
    fn rejects_missing_segments() {
        assert_eq!(StreamPath::parse("acme").unwrap_err(), PathError::MissingSegment);
        assert_eq!(StreamPath::parse("/acme/").unwrap_err(), PathError::MissingSegment);
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(matches!(
            StreamPath::parse("acme/../etc"),
            Err(PathError::InvalidSegment(_))
        ));
        assert!(matches!(
            StreamPath::parse("acme/has space"),
            Err(PathError::InvalidSegment(_))
        ));
    }

    #[test]
    fn leading_slash_is_tolerated() {
        assert!(StreamPath::parse("/acme/orders").is_ok());
    }
}
