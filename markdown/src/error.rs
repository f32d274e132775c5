//! Error types for truenas-markdown.

use thiserror::Error;

/// Result type for Markdown generation
pub type Result<T> = std::result::Result<T, MarkdownError>;

/// Errors raised while turning a syntax tree into render nodes.
///
/// Generation is strict: anything outside the supported node set fails
/// instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkdownError {
    /// The tree handed to the generator is not rooted at a document node
    #[error("Expected a document at the root of the syntax tree, found {found}")]
    NotADocument { found: String },

    #[error("Unsure how to handle {kind} in {context}")]
    UnsupportedNode { kind: String, context: &'static str },

    /// Recognized, but not rendered yet
    #[error("{kind} is not implemented")]
    Unimplemented { kind: String },
}
