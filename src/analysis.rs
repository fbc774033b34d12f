//! Text analysis used when documents are indexed.
//!
//! Field values are split on Unicode word boundaries (UAX #29) and lowercased.
//! Punctuation and whitespace segments are dropped. In addition, the whole
//! normalized value is indexed as one keyword term, so identifiers such as
//! `doc-1` can be addressed by a single [`crate::document::Term`].

use unicode_segmentation::UnicodeSegmentation;

/// Tokenize a field value into normalized terms.
///
/// ```
/// use sarissa_nrt::analysis::tokenize;
///
/// let tokens: Vec<String> = tokenize("Hello, wörld! 42").collect();
/// assert_eq!(tokens, vec!["hello", "wörld", "42"]);
/// ```
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.unicode_words().map(str::to_lowercase)
}

/// Normalize a single term the same way [`tokenize`] normalizes tokens.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Every term a field value is indexed under: its word tokens followed by the
/// whole normalized value.
///
/// ```
/// use sarissa_nrt::analysis::index_terms;
///
/// assert_eq!(index_terms("Doc-1"), vec!["doc", "1", "doc-1"]);
/// assert_eq!(index_terms("rust"), vec!["rust"]);
/// ```
pub fn index_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = tokenize(text).collect();
    let keyword = normalize(text);
    if !keyword.is_empty() && !terms.contains(&keyword) {
        terms.push(keyword);
    }
    terms
}
