//! Generic Markdown syntax tree.
//!
//! Built from `pulldown-cmark`'s offset iterator: every `Start` / `End` pair
//! becomes an interior node and every other event a leaf, each with its byte
//! range in the source. The tree keeps distinctions the renderer needs but the
//! event stream does not carry, such as ATX versus Setext headings.

use pulldown_cmark::{CodeBlockKind, Event, LinkType, Options, Parser, Tag};
use std::fmt;
use std::ops::Range;

/// Kind of a syntax tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxKind {
    Document,
    /// `# Heading`
    AtxHeading { level: u8 },
    /// Heading underlined with `===` (level 1) or `---` (level 2)
    SetextHeading { level: u8 },
    Paragraph,
    BlockQuote,
    ThematicBreak,
    FencedCode { info: String },
    IndentedCode,
    OrderedList { start: u64 },
    UnorderedList,
    ListItem,
    Table,
    TableHead,
    TableRow,
    TableCell,
    HtmlBlock,
    Emphasis,
    Strong,
    Strikethrough,
    InlineLink { url: String, title: String },
    /// `<https://...>` or `<user@host>`
    Autolink { url: String },
    Image { url: String, title: String },
    CodeSpan,
    Text,
    /// Line ending inside a paragraph
    SoftBreak,
    HardBreak,
    /// Raw HTML inside an HTML block
    Html,
    InlineHtml,
    /// Anything else the parser produced, by debug name
    Other(String),
}

impl fmt::Display for SyntaxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxKind::Document => f.write_str("document"),
            SyntaxKind::AtxHeading { level } => write!(f, "ATX heading (level {})", level),
            SyntaxKind::SetextHeading { level } => write!(f, "Setext heading (level {})", level),
            SyntaxKind::Paragraph => f.write_str("paragraph"),
            SyntaxKind::BlockQuote => f.write_str("block quote"),
            SyntaxKind::ThematicBreak => f.write_str("thematic break"),
            SyntaxKind::FencedCode { .. } => f.write_str("fenced code block"),
            SyntaxKind::IndentedCode => f.write_str("indented code block"),
            SyntaxKind::OrderedList { .. } => f.write_str("ordered list"),
            SyntaxKind::UnorderedList => f.write_str("unordered list"),
            SyntaxKind::ListItem => f.write_str("list item"),
            SyntaxKind::Table => f.write_str("table"),
            SyntaxKind::TableHead => f.write_str("table head"),
            SyntaxKind::TableRow => f.write_str("table row"),
            SyntaxKind::TableCell => f.write_str("table cell"),
            SyntaxKind::HtmlBlock => f.write_str("HTML block"),
            SyntaxKind::Emphasis => f.write_str("emphasis"),
            SyntaxKind::Strong => f.write_str("strong emphasis"),
            SyntaxKind::Strikethrough => f.write_str("strikethrough"),
            SyntaxKind::InlineLink { .. } => f.write_str("link"),
            SyntaxKind::Autolink { .. } => f.write_str("autolink"),
            SyntaxKind::Image { .. } => f.write_str("image"),
            SyntaxKind::CodeSpan => f.write_str("code span"),
            SyntaxKind::Text => f.write_str("text"),
            SyntaxKind::SoftBreak => f.write_str("line ending"),
            SyntaxKind::HardBreak => f.write_str("hard line break"),
            SyntaxKind::Html => f.write_str("HTML"),
            SyntaxKind::InlineHtml => f.write_str("inline HTML"),
            SyntaxKind::Other(name) => f.write_str(name),
        }
    }
}

/// One node of the syntax tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxNode {
    pub kind: SyntaxKind,
    /// Byte range in the source text
    pub range: Range<usize>,
    /// Literal content of leaves (`Text`, `CodeSpan`, `Html`, `InlineHtml`)
    pub text: String,
    pub children: Vec<SyntaxNode>,
}

impl SyntaxNode {
    pub fn new(kind: SyntaxKind, range: Range<usize>) -> Self {
        Self {
            kind,
            range,
            text: String::new(),
            children: Vec::new(),
        }
    }

    pub fn leaf(kind: SyntaxKind, range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::new(kind, range)
        }
    }
}

fn parser_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH
}

/// Parse `text` into a syntax tree rooted at a `Document` node.
pub fn parse_syntax_tree(text: &str) -> SyntaxNode {
    let mut builder = TreeBuilder::new(text.len());

    for (event, range) in Parser::new_ext(text, parser_options()).into_offset_iter() {
        match event {
            Event::Start(tag) => {
                let source = text.get(range.clone()).unwrap_or_default();
                builder.open(SyntaxNode::new(classify_tag(tag, source), range));
            },
            Event::End(_) => builder.close(),
            Event::Text(content) => builder.append(SyntaxNode::leaf(SyntaxKind::Text, range, &*content)),
            Event::Code(content) => {
                builder.append(SyntaxNode::leaf(SyntaxKind::CodeSpan, range, &*content))
            },
            Event::Html(content) => builder.append(SyntaxNode::leaf(SyntaxKind::Html, range, &*content)),
            Event::InlineHtml(content) => {
                builder.append(SyntaxNode::leaf(SyntaxKind::InlineHtml, range, &*content))
            },
            Event::SoftBreak => builder.append(SyntaxNode::new(SyntaxKind::SoftBreak, range)),
            Event::HardBreak => builder.append(SyntaxNode::new(SyntaxKind::HardBreak, range)),
            Event::Rule => builder.append(SyntaxNode::new(SyntaxKind::ThematicBreak, range)),
            other => builder.append(SyntaxNode::new(SyntaxKind::Other(format!("{:?}", other)), range)),
        }
    }

    builder.finish()
}

fn classify_tag(tag: Tag<'_>, source: &str) -> SyntaxKind {
    match tag {
        Tag::Paragraph => SyntaxKind::Paragraph,
        Tag::Heading { level, .. } => {
            let level = level as u8;
            if is_atx_heading(source) {
                SyntaxKind::AtxHeading { level }
            } else {
                SyntaxKind::SetextHeading { level }
            }
        },
        Tag::BlockQuote(_) => SyntaxKind::BlockQuote,
        Tag::CodeBlock(CodeBlockKind::Fenced(info)) => SyntaxKind::FencedCode {
            info: info.to_string(),
        },
        Tag::CodeBlock(CodeBlockKind::Indented) => SyntaxKind::IndentedCode,
        Tag::HtmlBlock => SyntaxKind::HtmlBlock,
        Tag::List(Some(start)) => SyntaxKind::OrderedList { start },
        Tag::List(None) => SyntaxKind::UnorderedList,
        Tag::Item => SyntaxKind::ListItem,
        Tag::Table(_) => SyntaxKind::Table,
        Tag::TableHead => SyntaxKind::TableHead,
        Tag::TableRow => SyntaxKind::TableRow,
        Tag::TableCell => SyntaxKind::TableCell,
        Tag::Emphasis => SyntaxKind::Emphasis,
        Tag::Strong => SyntaxKind::Strong,
        Tag::Strikethrough => SyntaxKind::Strikethrough,
        Tag::Link {
            link_type: LinkType::Autolink | LinkType::Email,
            dest_url,
            ..
        } => SyntaxKind::Autolink {
            url: dest_url.to_string(),
        },
        Tag::Link { dest_url, title, .. } => SyntaxKind::InlineLink {
            url: dest_url.to_string(),
            title: title.to_string(),
        },
        Tag::Image { dest_url, title, .. } => SyntaxKind::Image {
            url: dest_url.to_string(),
            title: title.to_string(),
        },
        other => SyntaxKind::Other(format!("{:?}", other)),
    }
}

/// An ATX heading opens with up to three spaces and one to six `#` followed
/// by whitespace or the end of the line.
fn is_atx_heading(source: &str) -> bool {
    let trimmed = source.trim_start_matches(' ');
    if source.len() - trimmed.len() > 3 {
        return false;
    }
    let hashes = trimmed.bytes().take_while(|&b| b == b'#').count();
    if !(1..=6).contains(&hashes) {
        return false;
    }
    matches!(trimmed.as_bytes().get(hashes), None | Some(b' ' | b'\t' | b'\n' | b'\r'))
}

struct TreeBuilder {
    stack: Vec<SyntaxNode>,
}

impl TreeBuilder {
    fn new(len: usize) -> Self {
        Self {
            stack: vec![SyntaxNode::new(SyntaxKind::Document, 0..len)],
        }
    }

    fn open(&mut self, node: SyntaxNode) {
        self.stack.push(node);
    }

    fn append(&mut self, node: SyntaxNode) {
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(node);
        }
    }

    /// Close the innermost open node. The document root is never closed.
    fn close(&mut self) {
        if self.stack.len() > 1 {
            if let Some(node) = self.stack.pop() {
                self.append(node);
            }
        }
    }

    fn finish(mut self) -> SyntaxNode {
        while self.stack.len() > 1 {
            self.close();
        }
        self.stack
            .pop()
            .unwrap_or_else(|| SyntaxNode::new(SyntaxKind::Document, 0..0))
    }
}
