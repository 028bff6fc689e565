/// Inline text spans with formatting
#[derive(Debug, Clone, PartialEq)]
pub enum Span {
    Text(String),
    Bold(Vec<Span>),
    Italic(Vec<Span>),
    Strikethrough(Vec<Span>),
    Superscript(Vec<Span>),
    Subscript(Vec<Span>),
    Code(String),
    /// `url` is either external or `#label` for a heading in the same document.
    Link {
        url: String,
        content: Vec<Span>,
    },
    /// `path` is relative to the document root and known to exist.
    Image {
        path: String,
        alt: String,
    },
    Footnote(Vec<Block>),
    Checkbox(bool),
    LineBreak,
}

/// A single list item, which can hold any block content including nested lists
#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub blocks: Vec<Block>,
}

/// A list (ordered or unordered)
#[derive(Debug, Clone, PartialEq)]
pub struct List {
    pub ordered: bool,
    pub start: Option<u64>,
    /// No item wraps its text in a paragraph.
    pub tight: bool,
    pub items: Vec<ListItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    None,
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub term: Vec<Span>,
    pub details: Vec<Vec<Block>>,
}

/// Block-level elements read from the HTML body
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading {
        level: u8,
        /// Label other blocks can link to.
        id: Option<String>,
        content: Vec<Span>,
    },
    Paragraph {
        content: Vec<Span>,
    },
    CodeBlock {
        language: Option<String>,
        content: String,
    },
    List(List),
    Table {
        alignments: Vec<Alignment>,
        headers: Vec<Vec<Span>>,
        rows: Vec<Vec<Vec<Span>>>,
    },
    BlockQuote(Vec<Block>),
    DefinitionList(Vec<Definition>),
    Rule,
}
