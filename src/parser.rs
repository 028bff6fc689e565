use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::block::{Alignment, Block, Definition, List, ListItem, Span};
use crate::dom::{Element, Node};

/// Image formats the typesetter can embed.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp"];

/// Elements whose content is never rendered
const IGNORED: &[&str] = &[
    "head", "title", "meta", "link", "script", "style", "template", "noscript", "iframe", "object",
];

/// Elements that contain blocks but add nothing of their own
const CONTAINERS: &[&str] = &[
    "html", "body", "div", "section", "article", "header", "footer", "main", "nav", "aside",
    "figure", "details", "center", "address", "fieldset", "form", "hgroup", "li", "dt", "dd",
];

/// Build blocks from the `<body>` of a parsed HTML document.
///
/// Relative image sources are resolved against `base_dir`; images that cannot
/// be embedded fall back to their alt text.
pub fn parse(document: &Element, base_dir: &Path) -> Vec<Block> {
    let body = document.find("body").unwrap_or(document);
    let mut parser = HtmlParser::new(body, base_dir);
    parser.blocks(&body.children)
}

struct HtmlParser<'a> {
    base_dir: PathBuf,
    // Footnote definitions by id
    footnotes: HashMap<&'a str, &'a Element>,
    // Labels of every heading with an id, for resolving `#fragment` links
    heading_ids: HashSet<String>,
    // Labels already attached to a heading
    emitted_ids: HashSet<String>,
    // Footnotes being expanded, to stop self references
    expanding: Vec<&'a str>,
}

impl<'a> HtmlParser<'a> {
    fn new(body: &'a Element, base_dir: &Path) -> Self {
        let mut footnotes = HashMap::new();
        let mut heading_ids = HashSet::new();
        for element in body.descendants() {
            if element.name == "div" && element.has_class("footnote-definition") {
                if let Some(id) = element.attr("id") {
                    footnotes.entry(id).or_insert(element);
                }
            } else if heading_level(&element.name).is_some() {
                if let Some(label) = element.attr("id").and_then(label_name) {
                    heading_ids.insert(label);
                }
            }
        }

        let base_dir = fs::canonicalize(base_dir).unwrap_or_else(|_| base_dir.to_path_buf());

        Self {
            base_dir,
            footnotes,
            heading_ids,
            emitted_ids: HashSet::new(),
            expanding: Vec::new(),
        }
    }

    fn blocks(&mut self, nodes: &'a [Node]) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut inline = Vec::new();

        for node in nodes {
            match node {
                Node::Element(element) if is_block(element) => {
                    flush_paragraph(&mut inline, &mut blocks);
                    self.block(element, &mut blocks);
                }
                _ => self.inline(node, &mut inline),
            }
        }
        flush_paragraph(&mut inline, &mut blocks);

        blocks
    }

    fn block(&mut self, element: &'a Element, blocks: &mut Vec<Block>) {
        let name = element.name.as_str();

        if let Some(level) = heading_level(name) {
            let mut content = self.spans(&element.children);
            trim_spans(&mut content);
            let id = element
                .attr("id")
                .and_then(label_name)
                .filter(|label| self.emitted_ids.insert(label.clone()));
            blocks.push(Block::Heading { level, id, content });
            return;
        }

        match name {
            "p" => {
                let mut content = self.spans(&element.children);
                flush_paragraph(&mut content, blocks);
            }
            "pre" => {
                let language = element
                    .find("code")
                    .and_then(|code| code.attr("class"))
                    .and_then(|classes| {
                        classes
                            .split_ascii_whitespace()
                            .find_map(|class| class.strip_prefix("language-"))
                    })
                    .filter(|lang| !lang.is_empty())
                    .map(str::to_string);
                blocks.push(Block::CodeBlock {
                    language,
                    content: element.text_content(),
                });
            }
            "ul" | "ol" => blocks.push(Block::List(self.list(element))),
            "table" => blocks.push(self.table(element)),
            "blockquote" => blocks.push(Block::BlockQuote(self.blocks(&element.children))),
            "dl" => blocks.push(Block::DefinitionList(self.definitions(element))),
            "hr" => blocks.push(Block::Rule),
            // Rendered where they are referenced
            "div" if element.has_class("footnote-definition") => {}
            _ if IGNORED.contains(&name) => {}
            _ => blocks.extend(self.blocks(&element.children)),
        }
    }

    fn list(&mut self, element: &'a Element) -> List {
        let ordered = element.name == "ol";
        let start = if ordered {
            element.attr("start").and_then(|s| s.trim().parse().ok())
        } else {
            None
        };

        let mut tight = true;
        let mut items = Vec::new();
        for item in element.child_elements().filter(|e| e.name == "li") {
            if item.child_elements().any(|e| e.name == "p") {
                tight = false;
            }
            items.push(ListItem {
                blocks: self.blocks(&item.children),
            });
        }

        List {
            ordered,
            start,
            tight,
            items,
        }
    }

    fn table(&mut self, element: &'a Element) -> Block {
        let mut head_rows: Vec<&Element> = Vec::new();
        let mut body_rows: Vec<&Element> = Vec::new();
        for child in element.child_elements() {
            match child.name.as_str() {
                "thead" => head_rows.extend(child.child_elements().filter(|e| e.name == "tr")),
                "tbody" | "tfoot" => {
                    body_rows.extend(child.child_elements().filter(|e| e.name == "tr"))
                }
                "tr" => body_rows.push(child),
                _ => {}
            }
        }

        // Without a thead, a leading row of only th cells is the header
        let first_is_header = body_rows.first().is_some_and(|row| {
            let mut cells = table_cells(row).peekable();
            cells.peek().is_some() && cells.all(|cell| cell.name == "th")
        });
        if head_rows.is_empty() && first_is_header {
            head_rows.push(body_rows.remove(0));
        }

        let mut head_rows = head_rows.into_iter();
        let header_row = head_rows.next();
        // Extra header rows render as ordinary rows
        let rows: Vec<&Element> = head_rows.chain(body_rows).collect();

        let alignments: Vec<Alignment> = header_row
            .or_else(|| rows.first().copied())
            .map(|row| table_cells(row).map(cell_alignment).collect())
            .unwrap_or_default();

        let headers = header_row
            .map(|row| self.row(row))
            .unwrap_or_default();
        let rows = rows.into_iter().map(|row| self.row(row)).collect();

        Block::Table {
            alignments,
            headers,
            rows,
        }
    }

    fn row(&mut self, row: &'a Element) -> Vec<Vec<Span>> {
        table_cells(row)
            .map(|cell| {
                let mut content = self.spans(&cell.children);
                trim_spans(&mut content);
                content
            })
            .collect()
    }

    fn definitions(&mut self, element: &'a Element) -> Vec<Definition> {
        let mut definitions: Vec<Definition> = Vec::new();
        for child in element.child_elements() {
            match child.name.as_str() {
                "dt" => {
                    let mut term = self.spans(&child.children);
                    trim_spans(&mut term);
                    definitions.push(Definition {
                        term,
                        details: Vec::new(),
                    });
                }
                "dd" => {
                    let details = self.blocks(&child.children);
                    match definitions.last_mut() {
                        Some(definition) => definition.details.push(details),
                        None => definitions.push(Definition {
                            term: Vec::new(),
                            details: vec![details],
                        }),
                    }
                }
                _ => {}
            }
        }
        definitions
    }

    fn spans(&mut self, nodes: &'a [Node]) -> Vec<Span> {
        let mut spans = Vec::new();
        for node in nodes {
            self.inline(node, &mut spans);
        }
        spans
    }

    fn inline(&mut self, node: &'a Node, out: &mut Vec<Span>) {
        let element = match node {
            Node::Text(text) => {
                push_text(out, text);
                return;
            }
            Node::Element(element) => element,
        };

        match element.name.as_str() {
            "strong" | "b" => out.push(Span::Bold(self.spans(&element.children))),
            "em" | "i" | "cite" | "var" | "dfn" => {
                out.push(Span::Italic(self.spans(&element.children)))
            }
            "del" | "s" | "strike" => out.push(Span::Strikethrough(self.spans(&element.children))),
            "sup" if element.has_class("footnote-reference") => self.footnote_reference(element, out),
            "sup" => out.push(Span::Superscript(self.spans(&element.children))),
            "sub" => out.push(Span::Subscript(self.spans(&element.children))),
            "code" | "kbd" | "samp" | "tt" => {
                let text = element.text_content();
                out.push(Span::Code(text.replace(['\n', '\r'], " ")));
            }
            "a" => self.link(element, out),
            "img" => self.image(element, out),
            "br" => out.push(Span::LineBreak),
            "input" if element.attr("type") == Some("checkbox") => {
                out.push(Span::Checkbox(element.has_attr("checked")))
            }
            name if IGNORED.contains(&name) || name == "input" => {}
            // Unknown inline elements render their content
            _ => {
                for child in &element.children {
                    self.inline(child, out);
                }
            }
        }
    }

    fn link(&mut self, element: &'a Element, out: &mut Vec<Span>) {
        let content = self.spans(&element.children);
        let href = element.attr("href").map(str::trim).unwrap_or_default();

        if href.is_empty() {
            extend_spans(out, content);
        } else if let Some(fragment) = href.strip_prefix('#') {
            match label_name(fragment).filter(|label| self.heading_ids.contains(label)) {
                Some(label) => out.push(Span::Link {
                    url: format!("#{label}"),
                    content,
                }),
                None => extend_spans(out, content),
            }
        } else {
            out.push(Span::Link {
                url: href.to_string(),
                content,
            });
        }
    }

    fn footnote_reference(&mut self, element: &'a Element, out: &mut Vec<Span>) {
        let definition = element
            .find("a")
            .and_then(|a| a.attr("href"))
            .and_then(|href| href.strip_prefix('#'))
            .and_then(|id| self.footnotes.get_key_value(id).map(|(id, def)| (*id, *def)));

        let Some((id, definition)) = definition else {
            out.push(Span::Superscript(self.spans(&element.children)));
            return;
        };
        if self.expanding.contains(&id) {
            log::warn!("footnote {id:?} refers to itself");
            out.push(Span::Superscript(self.spans(&element.children)));
            return;
        }

        self.expanding.push(id);
        let content: Vec<&'a Node> = definition
            .children
            .iter()
            .filter(|node| {
                !matches!(node, Node::Element(e) if e.has_class("footnote-definition-label"))
            })
            .collect();
        let blocks = self.footnote_blocks(&content);
        self.expanding.pop();

        out.push(Span::Footnote(blocks));
    }

    fn footnote_blocks(&mut self, nodes: &[&'a Node]) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut inline = Vec::new();
        for &node in nodes {
            match node {
                Node::Element(element) if is_block(element) => {
                    flush_paragraph(&mut inline, &mut blocks);
                    self.block(element, &mut blocks);
                }
                _ => self.inline(node, &mut inline),
            }
        }
        flush_paragraph(&mut inline, &mut blocks);
        blocks
    }

    fn image(&mut self, element: &Element, out: &mut Vec<Span>) {
        let alt = element.attr("alt").unwrap_or_default();
        let src = element.attr("src").unwrap_or_default();

        match self.resolve_image(src) {
            Ok(path) => out.push(Span::Image {
                path,
                alt: alt.to_string(),
            }),
            Err(reason) => {
                log::warn!("image {src:?} not embedded: {reason}");
                push_text(out, alt);
            }
        }
    }

    /// Map an image source to a root-relative path inside `base_dir`.
    fn resolve_image(&self, src: &str) -> Result<String, &'static str> {
        let src = src.trim();
        if src.is_empty() {
            return Err("empty source");
        }
        if src.starts_with("data:") || src.starts_with("//") || src.contains("://") {
            return Err("remote images are not fetched");
        }

        let src = src.split(['?', '#']).next().unwrap_or(src);
        let decoded = percent_decode_str(src)
            .decode_utf8()
            .map_err(|_| "source is not valid UTF-8")?;
        let relative = Path::new(decoded.trim_start_matches('/'));

        let extension = relative
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            return Err("unsupported image format");
        }

        let full = fs::canonicalize(self.base_dir.join(relative)).map_err(|_| "file not found")?;
        let inside = full
            .strip_prefix(&self.base_dir)
            .map_err(|_| "file is outside the document directory")?;

        let mut path = String::new();
        for component in inside.components() {
            if let Component::Normal(part) = component {
                path.push('/');
                path.push_str(&part.to_string_lossy());
            }
        }
        Ok(path)
    }
}

fn is_block(element: &Element) -> bool {
    let name = element.name.as_str();
    heading_level(name).is_some()
        || matches!(
            name,
            "p" | "pre" | "ul" | "ol" | "table" | "blockquote" | "dl" | "hr"
        )
        || CONTAINERS.contains(&name)
        || IGNORED.contains(&name)
}

fn heading_level(name: &str) -> Option<u8> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn table_cells(row: &Element) -> impl Iterator<Item = &Element> {
    row.child_elements()
        .filter(|cell| cell.name == "td" || cell.name == "th")
}

fn cell_alignment(cell: &Element) -> Alignment {
    let from_style = cell.attr("style").and_then(|style| {
        style.split(';').find_map(|decl| {
            let (property, value) = decl.split_once(':')?;
            (property.trim().eq_ignore_ascii_case("text-align")).then(|| value.trim())
        })
    });
    match from_style.or_else(|| cell.attr("align")).map(str::to_ascii_lowercase).as_deref() {
        Some("left") => Alignment::Left,
        Some("center") => Alignment::Center,
        Some("right") => Alignment::Right,
        _ => Alignment::None,
    }
}

/// A heading id as a typesetter label; other characters become `-`.
pub fn label_name(id: &str) -> Option<String> {
    let label: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if label.is_empty() { None } else { Some(label) }
}

/// Append text with HTML whitespace collapsing.
fn push_text(out: &mut Vec<Span>, text: &str) {
    let mut after_space = match out.last() {
        Some(Span::Text(last)) => last.ends_with(' '),
        Some(Span::LineBreak) => true,
        _ => false,
    };

    let mut collapsed = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii_whitespace() {
            if !after_space {
                collapsed.push(' ');
                after_space = true;
            }
        } else {
            collapsed.push(ch);
            after_space = false;
        }
    }

    if collapsed.is_empty() {
        return;
    }
    if let Some(Span::Text(last)) = out.last_mut() {
        last.push_str(&collapsed);
    } else {
        out.push(Span::Text(collapsed));
    }
}

fn extend_spans(out: &mut Vec<Span>, spans: Vec<Span>) {
    for span in spans {
        match span {
            Span::Text(text) => push_text(out, &text),
            other => out.push(other),
        }
    }
}

/// Drop leading and trailing whitespace of a span run.
fn trim_spans(spans: &mut Vec<Span>) {
    while let Some(Span::Text(text)) = spans.first_mut() {
        let kept = text.trim_start().len();
        if kept == 0 {
            spans.remove(0);
            continue;
        }
        let start = text.len() - kept;
        text.drain(..start);
        break;
    }
    while let Some(Span::Text(text)) = spans.last_mut() {
        let kept = text.trim_end().len();
        if kept == 0 {
            spans.pop();
            continue;
        }
        text.truncate(kept);
        break;
    }
}

fn flush_paragraph(inline: &mut Vec<Span>, blocks: &mut Vec<Block>) {
    trim_spans(inline);
    if !inline.is_empty() {
        blocks.push(Block::Paragraph {
            content: std::mem::take(inline),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom;
    use crate::markup::build_html;

    fn blocks(markdown: &str) -> Vec<Block> {
        let document = dom::parse(&build_html(markdown));
        parse(&document, Path::new("."))
    }

    fn text(s: &str) -> Span {
        Span::Text(s.to_string())
    }

    fn paragraph(spans: Vec<Span>) -> Block {
        Block::Paragraph { content: spans }
    }

    #[test]
    fn title_and_paragraph() {
        assert_eq!(
            blocks("# Title\n\nHello"),
            vec![
                Block::Heading {
                    level: 1,
                    id: None,
                    content: vec![text("Title")],
                },
                paragraph(vec![text("Hello")]),
            ]
        );
    }

    #[test]
    fn head_is_not_rendered() {
        // The stylesheet lives in <head> and must not leak into the body
        let result = blocks("");
        assert!(result.is_empty());
    }

    #[test]
    fn raw_html_with_bare_ampersand() {
        assert_eq!(
            blocks("<div>\nTom & Jerry &zzz; a < b\n</div>\n"),
            vec![paragraph(vec![text("Tom & Jerry &zzz; a < b")])]
        );
    }

    #[test]
    fn deeply_nested_quotes_are_capped() {
        let result = blocks(&format!("{}x", "> ".repeat(3000)));
        let mut current = result.as_slice();
        let mut levels = 0;
        while let [Block::BlockQuote(inner)] = current {
            levels += 1;
            current = inner;
        }
        assert!(levels > 1);
        assert!(levels < dom::MAX_DEPTH);
        assert_eq!(current, [paragraph(vec![text("x")])]);
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(
            blocks("one\ntwo   three"),
            vec![paragraph(vec![text("one two three")])]
        );
    }

    #[test]
    fn inline_formatting() {
        assert_eq!(
            blocks("a **b** *c* `d  e` <sub>f</sub><sup>g</sup>"),
            vec![paragraph(vec![
                text("a "),
                Span::Bold(vec![text("b")]),
                text(" "),
                Span::Italic(vec![text("c")]),
                text(" "),
                Span::Code("d  e".to_string()),
                text(" "),
                Span::Subscript(vec![text("f")]),
                Span::Superscript(vec![text("g")]),
            ])]
        );
    }

    #[test]
    fn hard_break() {
        assert_eq!(
            blocks("line one  \nline two"),
            vec![paragraph(vec![
                text("line one"),
                Span::LineBreak,
                text("line two"),
            ])]
        );
    }

    #[test]
    fn code_block_keeps_whitespace() {
        assert_eq!(
            blocks("```rust\nfn main() {\n    let x = 1 < 2;\n}\n```"),
            vec![Block::CodeBlock {
                language: Some("rust".to_string()),
                content: "fn main() {\n    let x = 1 < 2;\n}\n".to_string(),
            }]
        );
    }

    #[test]
    fn tight_and_loose_lists() {
        let tight = blocks("- one\n- two\n  - nested");
        let Block::List(list) = &tight[0] else {
            panic!("expected list, got {tight:?}");
        };
        assert!(list.tight);
        assert!(!list.ordered);
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].blocks, vec![paragraph(vec![text("one")])]);
        assert!(matches!(&list.items[1].blocks[1], Block::List(nested) if nested.items.len() == 1));

        let loose = blocks("3. one\n\n4. two\n");
        let Block::List(list) = &loose[0] else {
            panic!("expected list, got {loose:?}");
        };
        assert!(!list.tight);
        assert!(list.ordered);
        assert_eq!(list.start, Some(3));
    }

    #[test]
    fn task_list() {
        let result = blocks("- [x] done\n- [ ] todo");
        let Block::List(list) = &result[0] else {
            panic!("expected list, got {result:?}");
        };
        assert_eq!(
            list.items[0].blocks,
            vec![paragraph(vec![Span::Checkbox(true), text(" done")])]
        );
        assert_eq!(
            list.items[1].blocks,
            vec![paragraph(vec![Span::Checkbox(false), text(" todo")])]
        );
    }

    #[test]
    fn table() {
        let result = blocks("| A | B |\n|---|--:|\n| 1 | **2** |\n| 3 |");
        assert_eq!(
            result,
            vec![Block::Table {
                alignments: vec![Alignment::None, Alignment::Right],
                headers: vec![vec![text("A")], vec![text("B")]],
                rows: vec![
                    vec![vec![text("1")], vec![Span::Bold(vec![text("2")])]],
                    vec![vec![text("3")], vec![]],
                ],
            }]
        );
    }

    #[test]
    fn raw_html_table_without_thead() {
        let result = blocks("<table><tr><th>H</th></tr><tr><td align=\"center\">x</td></tr></table>");
        assert_eq!(
            result,
            vec![Block::Table {
                alignments: vec![Alignment::None],
                headers: vec![vec![text("H")]],
                rows: vec![vec![vec![text("x")]]],
            }]
        );
    }

    #[test]
    fn blockquote_and_rule() {
        assert_eq!(
            blocks("> quoted\n\n---"),
            vec![
                Block::BlockQuote(vec![paragraph(vec![text("quoted")])]),
                Block::Rule,
            ]
        );
    }

    #[test]
    fn definition_list() {
        assert_eq!(
            blocks("Term\n: First\n: Second\n"),
            vec![Block::DefinitionList(vec![Definition {
                term: vec![text("Term")],
                details: vec![
                    vec![paragraph(vec![text("First")])],
                    vec![paragraph(vec![text("Second")])],
                ],
            }])]
        );
    }

    #[test]
    fn footnotes_are_inlined() {
        assert_eq!(
            blocks("Claim[^src].\n\n[^src]: The source.\n"),
            vec![paragraph(vec![
                text("Claim"),
                Span::Footnote(vec![paragraph(vec![text("The source.")])]),
                text("."),
            ])]
        );
    }

    #[test]
    fn links() {
        assert_eq!(
            blocks("## Setup {#setup}\n\n[see](#setup) [gone](#missing) [web](https://example.com/?a=1&b=2)"),
            vec![
                Block::Heading {
                    level: 2,
                    id: Some("setup".to_string()),
                    content: vec![text("Setup")],
                },
                paragraph(vec![
                    Span::Link {
                        url: "#setup".to_string(),
                        content: vec![text("see")],
                    },
                    text(" gone "),
                    Span::Link {
                        url: "https://example.com/?a=1&b=2".to_string(),
                        content: vec![text("web")],
                    },
                ]),
            ]
        );
    }

    #[test]
    fn duplicate_heading_ids_label_once() {
        let result = blocks("# A {#x}\n\n# B {#x}\n");
        let ids: Vec<_> = result
            .iter()
            .map(|block| match block {
                Block::Heading { id, .. } => id.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![Some("x".to_string()), None]);
    }

    #[test]
    fn label_names() {
        assert_eq!(label_name("intro"), Some("intro".to_string()));
        assert_eq!(label_name("a b/c"), Some("a-b-c".to_string()));
        assert_eq!(label_name("  "), None);
    }

    #[test]
    fn images_resolve_against_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("img")).unwrap();
        fs::write(dir.path().join("img").join("logo one.png"), b"png").unwrap();

        let html = build_html(
            "![Logo](img/logo%20one.png) ![Remote](https://example.com/a.png) ![Missing](nope.png) ![Escape](../x.png) ![Bitmap](img/a.bmp)",
        );
        let document = dom::parse(&html);
        let result = parse(&document, dir.path());

        assert_eq!(
            result,
            vec![paragraph(vec![
                Span::Image {
                    path: "/img/logo one.png".to_string(),
                    alt: "Logo".to_string(),
                },
                text(" Remote Missing Escape Bitmap"),
            ])]
        );
    }
}
