//! Syntax tree → render node conversion.
//!
//! Generation is recursive over the tree and strict: a node kind the render
//! set has no place for fails with [`MarkdownError::UnsupportedNode`] rather
//! than being skipped.

use crate::error::{MarkdownError, Result};
use crate::node::{MarkdownNode, SpanNode};
use crate::syntax::{SyntaxKind, SyntaxNode};

/// Convert a document tree into block nodes.
pub fn generate(root: &SyntaxNode) -> Result<Vec<MarkdownNode>> {
    if root.kind != SyntaxKind::Document {
        return Err(MarkdownError::NotADocument {
            found: root.kind.to_string(),
        });
    }
    blocks(&root.children, "document")
}

fn blocks(nodes: &[SyntaxNode], context: &'static str) -> Result<Vec<MarkdownNode>> {
    nodes.iter().map(|node| block(node, context)).collect()
}

fn block(node: &SyntaxNode, context: &'static str) -> Result<MarkdownNode> {
    match &node.kind {
        SyntaxKind::AtxHeading { level } | SyntaxKind::SetextHeading { level } => {
            Ok(MarkdownNode::Heading {
                level: *level,
                children: paragraph_spans(&node.children)?,
            })
        },
        SyntaxKind::Paragraph => Ok(MarkdownNode::Paragraph {
            children: paragraph_spans(&node.children)?,
        }),
        SyntaxKind::BlockQuote => Ok(MarkdownNode::BlockQuote {
            children: blocks(&node.children, "block quote")?,
        }),
        SyntaxKind::ThematicBreak => Ok(MarkdownNode::Rule),
        SyntaxKind::FencedCode { info } => Ok(MarkdownNode::CodeBlock {
            code: code_text(node),
            language: info.split_whitespace().next().map(str::to_string),
        }),
        SyntaxKind::IndentedCode => Ok(MarkdownNode::CodeBlock {
            code: code_text(node),
            language: None,
        }),
        SyntaxKind::OrderedList { start } => Ok(MarkdownNode::OrderedList {
            start: *start,
            items: list_items(node)?,
        }),
        SyntaxKind::UnorderedList => Ok(MarkdownNode::UnorderedList {
            items: list_items(node)?,
        }),
        SyntaxKind::Table => Err(MarkdownError::Unimplemented {
            kind: node.kind.to_string(),
        }),
        other => Err(MarkdownError::UnsupportedNode {
            kind: other.to_string(),
            context,
        }),
    }
}

/// Code block content without the final line ending.
fn code_text(node: &SyntaxNode) -> String {
    let mut code: String = node
        .children
        .iter()
        .filter(|child| child.kind == SyntaxKind::Text)
        .map(|child| child.text.as_str())
        .collect();
    if code.ends_with('\n') {
        code.pop();
        if code.ends_with('\r') {
            code.pop();
        }
    }
    code
}

fn is_block(kind: &SyntaxKind) -> bool {
    matches!(
        kind,
        SyntaxKind::AtxHeading { .. }
            | SyntaxKind::SetextHeading { .. }
            | SyntaxKind::Paragraph
            | SyntaxKind::BlockQuote
            | SyntaxKind::ThematicBreak
            | SyntaxKind::FencedCode { .. }
            | SyntaxKind::IndentedCode
            | SyntaxKind::OrderedList { .. }
            | SyntaxKind::UnorderedList
            | SyntaxKind::Table
            | SyntaxKind::HtmlBlock
    )
}

/// Every item becomes one paragraph. Tight items hold inline nodes directly,
/// loose items wrap them in a single paragraph.
fn list_items(list: &SyntaxNode) -> Result<Vec<MarkdownNode>> {
    let mut items = Vec::with_capacity(list.children.len());
    for item in &list.children {
        if item.kind != SyntaxKind::ListItem {
            return Err(MarkdownError::UnsupportedNode {
                kind: item.kind.to_string(),
                context: "list",
            });
        }

        let nested: Vec<&SyntaxNode> = item.children.iter().filter(|c| is_block(&c.kind)).collect();
        let paragraph = match nested.as_slice() {
            [] => MarkdownNode::Paragraph {
                children: paragraph_spans(&item.children)?,
            },
            [only] if only.kind == SyntaxKind::Paragraph && item.children.len() == 1 => {
                block(only, "list item")?
            },
            _ => {
                let kind = nested
                    .iter()
                    .find(|c| c.kind != SyntaxKind::Paragraph)
                    .unwrap_or(&nested[0])
                    .kind
                    .to_string();
                return Err(MarkdownError::UnsupportedNode {
                    kind,
                    context: "list item",
                });
            },
        };
        items.push(paragraph);
    }
    Ok(items)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Style {
    bold: bool,
    italic: bool,
    strikethrough: bool,
}

fn paragraph_spans(nodes: &[SyntaxNode]) -> Result<Vec<SpanNode>> {
    let mut spans = Vec::new();
    collect_spans(nodes, Style::default(), &mut spans)?;
    trim_spans(&mut spans);
    Ok(spans)
}

fn collect_spans(nodes: &[SyntaxNode], style: Style, out: &mut Vec<SpanNode>) -> Result<()> {
    for node in nodes {
        match &node.kind {
            SyntaxKind::Text => push_text(out, &node.text, style),
            SyntaxKind::Emphasis => collect_spans(&node.children, Style { italic: true, ..style }, out)?,
            SyntaxKind::Strong => collect_spans(&node.children, Style { bold: true, ..style }, out)?,
            SyntaxKind::Strikethrough => collect_spans(
                &node.children,
                Style {
                    strikethrough: true,
                    ..style
                },
                out,
            )?,
            SyntaxKind::SoftBreak => out.push(SpanNode::LineBreak { hard: false }),
            SyntaxKind::HardBreak => out.push(SpanNode::LineBreak { hard: true }),
            SyntaxKind::CodeSpan => out.push(SpanNode::CodeSpan {
                text: node.text.clone(),
            }),
            SyntaxKind::InlineLink { url, title } => out.push(SpanNode::Link {
                display_text: plain_text(&node.children),
                url: url.clone(),
                title: non_empty(title),
            }),
            SyntaxKind::Autolink { url } => {
                let display_text = plain_text(&node.children);
                out.push(SpanNode::Link {
                    display_text: if display_text.is_empty() {
                        url.clone()
                    } else {
                        display_text
                    },
                    url: url.clone(),
                    title: None,
                });
            },
            SyntaxKind::Image { url, title } => out.push(SpanNode::Image {
                url: url.clone(),
                alt_text: plain_text(&node.children),
                title: non_empty(title),
            }),
            other => {
                return Err(MarkdownError::UnsupportedNode {
                    kind: other.to_string(),
                    context: "paragraph",
                })
            },
        }
    }
    Ok(())
}

/// Adjacent runs with the same style merge into one `Text`.
fn push_text(out: &mut Vec<SpanNode>, text: &str, style: Style) {
    if text.is_empty() {
        return;
    }
    if let Some(SpanNode::Text {
        text: last,
        bold,
        italic,
        strikethrough,
    }) = out.last_mut()
    {
        if (Style {
            bold: *bold,
            italic: *italic,
            strikethrough: *strikethrough,
        }) == style
        {
            last.push_str(text);
            return;
        }
    }
    out.push(SpanNode::Text {
        text: text.to_string(),
        bold: style.bold,
        italic: style.italic,
        strikethrough: style.strikethrough,
    });
}

/// Strip whitespace and line breaks from both ends of a paragraph.
fn trim_spans(spans: &mut Vec<SpanNode>) {
    loop {
        match spans.first_mut() {
            Some(SpanNode::LineBreak { .. }) => {
                spans.remove(0);
            },
            Some(SpanNode::Text { text, .. }) => {
                let trimmed = text.trim_start();
                if trimmed.is_empty() {
                    spans.remove(0);
                } else {
                    *text = trimmed.to_string();
                    break;
                }
            },
            _ => break,
        }
    }
    loop {
        match spans.last_mut() {
            Some(SpanNode::LineBreak { .. }) => {
                spans.pop();
            },
            Some(SpanNode::Text { text, .. }) => {
                let trimmed = text.trim_end();
                if trimmed.is_empty() {
                    spans.pop();
                } else {
                    text.truncate(trimmed.len());
                    break;
                }
            },
            _ => break,
        }
    }
}

fn plain_text(nodes: &[SyntaxNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node.kind {
            SyntaxKind::Text | SyntaxKind::CodeSpan => out.push_str(&node.text),
            SyntaxKind::SoftBreak | SyntaxKind::HardBreak => out.push(' '),
            _ => out.push_str(&plain_text(&node.children)),
        }
    }
    out
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
