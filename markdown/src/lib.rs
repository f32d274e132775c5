//! # truenas-markdown
//!
//! Turns Markdown app notes into a small closed set of render nodes: headings,
//! paragraphs, lists, block quotes, code blocks, rules, and styled text spans
//! with links, images and inline code.
//!
//! Conversion happens in two steps. [`parse_syntax_tree`] tokenizes the text
//! with `pulldown-cmark` into a generic [`SyntaxNode`] tree, then [`generate`]
//! walks that tree and produces [`MarkdownNode`]s. Anything the node set cannot
//! express (HTML, nested blocks inside list items) is reported as an error
//! rather than dropped, and tables are recognized but not yet rendered.
//!
//! ```
//! use truenas_markdown::{parse_markdown, MarkdownNode, SpanNode};
//!
//! let nodes = parse_markdown("# Title\n\nSome *italic* text.").unwrap();
//! assert_eq!(nodes[0], MarkdownNode::heading(1, vec![SpanNode::text("Title")]));
//! ```

pub mod error;
pub mod generator;
pub mod node;
pub mod syntax;

pub use error::{MarkdownError, Result};
pub use generator::generate;
pub use node::{MarkdownNode, SpanNode};
pub use syntax::{parse_syntax_tree, SyntaxKind, SyntaxNode};

/// Parse Markdown text straight into render nodes.
pub fn parse_markdown(text: &str) -> Result<Vec<MarkdownNode>> {
    let tree = parse_syntax_tree(text);
    match generate(&tree) {
        Ok(nodes) => {
            log::debug!(
                "[truenas-markdown] Generated {} block node(s) from {} bytes",
                nodes.len(),
                text.len()
            );
            Ok(nodes)
        },
        Err(e) => {
            log::warn!("[truenas-markdown] Failed to generate nodes: {}", e);
            Err(e)
        },
    }
}
