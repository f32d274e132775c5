//! Render nodes produced by the generator.

/// Block-level node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkdownNode {
    Paragraph {
        children: Vec<SpanNode>,
    },
    /// Level is 1 through 6, for both ATX and Setext headings
    Heading {
        level: u8,
        children: Vec<SpanNode>,
    },
    BlockQuote {
        children: Vec<MarkdownNode>,
    },
    /// Each item is a `Paragraph`
    OrderedList {
        start: u64,
        items: Vec<MarkdownNode>,
    },
    /// Each item is a `Paragraph`
    UnorderedList {
        items: Vec<MarkdownNode>,
    },
    CodeBlock {
        code: String,
        language: Option<String>,
    },
    Rule,
}

impl MarkdownNode {
    pub fn paragraph(children: Vec<SpanNode>) -> Self {
        MarkdownNode::Paragraph { children }
    }

    pub fn heading(level: u8, children: Vec<SpanNode>) -> Self {
        MarkdownNode::Heading { level, children }
    }
}

/// Inline node inside a paragraph, heading or list item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanNode {
    Text {
        text: String,
        bold: bool,
        italic: bool,
        strikethrough: bool,
    },
    Link {
        display_text: String,
        url: String,
        title: Option<String>,
    },
    Image {
        url: String,
        alt_text: String,
        title: Option<String>,
    },
    CodeSpan {
        text: String,
    },
    /// Soft (`hard == false`) or hard line break
    LineBreak {
        hard: bool,
    },
}

impl SpanNode {
    /// Unstyled text.
    pub fn text(text: impl Into<String>) -> Self {
        SpanNode::Text {
            text: text.into(),
            bold: false,
            italic: false,
            strikethrough: false,
        }
    }

    pub fn bold(text: impl Into<String>) -> Self {
        SpanNode::Text {
            text: text.into(),
            bold: true,
            italic: false,
            strikethrough: false,
        }
    }

    pub fn italic(text: impl Into<String>) -> Self {
        SpanNode::Text {
            text: text.into(),
            bold: false,
            italic: true,
            strikethrough: false,
        }
    }

    pub fn code(text: impl Into<String>) -> Self {
        SpanNode::CodeSpan { text: text.into() }
    }
}
