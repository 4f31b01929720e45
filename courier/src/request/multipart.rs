//! Multipart form data for uploads.

use bytes::Bytes;
use std::path::PathBuf;

/// The content of a single multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartContent {
    /// In-memory bytes.
    Bytes(Bytes),
    /// A file read during encoding.
    File(PathBuf),
}

/// A named part of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    /// Form field name.
    pub name: String,
    /// Part content.
    pub content: MultipartContent,
    /// File name sent in the content disposition.
    pub file_name: Option<String>,
    /// MIME type of the part.
    pub mime_type: Option<String>,
}

impl MultipartPart {
    /// Creates a text part.
    #[must_use]
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: MultipartContent::Bytes(Bytes::from(value.into())),
            file_name: None,
            mime_type: None,
        }
    }

    /// Creates a part from in-memory bytes.
    #[must_use]
    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: MultipartContent::Bytes(data.into()),
            file_name: None,
            mime_type: None,
        }
    }

    /// Creates a part whose content is read from a file.
    ///
    /// The file name defaults to the last path component.
    #[must_use]
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Self {
            name: name.into(),
            content: MultipartContent::File(path),
            file_name,
            mime_type: None,
        }
    }

    /// Sets the file name.
    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// An ordered collection of multipart parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartFormData {
    parts: Vec<MultipartPart>,
}

impl MultipartFormData {
    /// Creates an empty form.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a part.
    #[must_use]
    pub fn part(mut self, part: MultipartPart) -> Self {
        self.parts.push(part);
        self
    }

    /// Appends a text field.
    #[must_use]
    pub fn text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.part(MultipartPart::text(name, value))
    }

    /// Returns the parts in insertion order.
    #[must_use]
    pub fn parts(&self) -> &[MultipartPart] {
        &self.parts
    }

    /// Returns the number of parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Returns true if the form has no parts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_part_defaults_file_name() {
        let part = MultipartPart::file("avatar", "/tmp/pics/me.png").with_mime_type("image/png");
        assert_eq!(part.file_name.as_deref(), Some("me.png"));
        assert_eq!(part.mime_type.as_deref(), Some("image/png"));
        assert_eq!(part.content, MultipartContent::File(PathBuf::from("/tmp/pics/me.png")));
    }

    #[test]
    fn test_form_preserves_order() {
        let form = MultipartFormData::new()
            .text("a", "1")
            .part(MultipartPart::bytes("b", vec![1u8, 2, 3]))
            .text("c", "3");

        let names: Vec<_> = form.parts().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(form.len(), 3);
        assert!(!form.is_empty());
    }
}
