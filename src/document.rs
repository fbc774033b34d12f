//! Stored documents and the terms used to address them.
//!
//! Documents are schema-less collections of text fields. Every field value is
//! stored verbatim and analyzed by [`crate::analysis::index_terms`] when the
//! document is flushed into a segment.
//!
//! # Examples
//!
//! ```
//! use sarissa_nrt::document::{Document, Term};
//!
//! let doc = Document::builder()
//!     .add_text("id", "42")
//!     .add_text("title", "Rust Programming Guide")
//!     .build();
//!
//! assert_eq!(doc.len(), 2);
//! assert!(doc.matches(&Term::new("title", "rust")));
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis;

/// A document with named text fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Document {
    fields: BTreeMap<String, String>,
}

impl Document {
    /// Create a new empty document.
    pub fn new() -> Self {
        Document {
            fields: BTreeMap::new(),
        }
    }

    /// Add (or replace) a field.
    pub fn add_field<S: Into<String>, T: Into<String>>(&mut self, name: S, value: T) {
        self.fields.insert(name.into(), value.into());
    }

    /// Get a field value by name.
    pub fn get_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Check if the document has the given field.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Iterate over `(name, value)` pairs in field-name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether the term's field is indexed under the term text.
    pub fn matches(&self, term: &Term) -> bool {
        self.get_field(&term.field)
            .map(|value| analysis::index_terms(value).contains(&term.text))
            .unwrap_or(false)
    }

    /// Create a new document builder.
    pub fn builder() -> DocumentBuilder {
        DocumentBuilder::new()
    }
}

/// Builder for [`Document`].
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    document: Document,
}

impl DocumentBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        DocumentBuilder {
            document: Document::new(),
        }
    }

    /// Add a text field.
    pub fn add_text<S: Into<String>, T: Into<String>>(mut self, name: S, value: T) -> Self {
        self.document.add_field(name, value);
        self
    }

    /// Build the document.
    pub fn build(self) -> Document {
        self.document
    }
}

/// A single indexed term: a word token or a whole normalized value of a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    /// Field name.
    pub field: String,
    /// Analyzed token text.
    pub text: String,
}

impl Term {
    /// Create a term. The text is normalized the same way indexed terms are,
    /// so it matches either a single word or a whole field value.
    pub fn new<F: Into<String>, T: AsRef<str>>(field: F, text: T) -> Self {
        Term {
            field: field.into(),
            text: analysis::normalize(text.as_ref()),
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.field, self.text)
    }
}
