use crate::block::{Alignment, Block, Definition, List, Span};
use crate::config::Config;
use crate::error::Result;

/// Code blocks up to this many lines are kept on one page
const UNBREAKABLE_CODE_LINES: usize = 20;

/// Page and text settings matching the fixed HTML stylesheet.
pub fn preamble(config: &Config) -> Result<String> {
    let margin = config.page.margin_length()?;
    let mut out = String::new();
    out.push_str(&format!(
        "#set page(paper: {}, margin: {})\n",
        string_literal(&config.page.paper),
        margin
    ));
    // body { font-family: serif; font-size: 11pt; line-height: 1.5; }
    out.push_str("#set text(font: \"Libertinus Serif\", size: 11pt)\n");
    out.push_str("#set par(leading: 0.8em, spacing: 1.2em, linebreaks: \"optimized\")\n");
    // code, pre { font-family: monospace; }
    out.push_str("#show raw: set text(font: \"DejaVu Sans Mono\")\n");
    // th, td { border: 1px solid #888; padding: 4px 6px; }
    out.push_str("#set table(stroke: 0.75pt + rgb(\"#888888\"), inset: (x: 4.5pt, y: 3pt))\n\n");
    Ok(out)
}

/// Convert blocks to Typst markup
pub fn blocks_to_typst(blocks: &[Block], config: &Config) -> Result<String> {
    let mut out = preamble(config)?;

    let mut i = 0;
    while i < blocks.len() {
        let block = &blocks[i];

        match block {
            Block::Heading { .. } => {
                // Keep heading with following content using a block that prevents breaks
                out.push_str("#block(breakable: false)[\n");
                emit_block(block, &mut out);

                // Include the next block if it exists (to keep heading with first content)
                if i + 1 < blocks.len() {
                    i += 1;
                    emit_block(&blocks[i], &mut out);
                }
                out.push_str("]\n\n");
            }
            _ => {
                emit_block(block, &mut out);
            }
        }

        i += 1;
    }

    Ok(out)
}

fn emit_block(block: &Block, out: &mut String) {
    match block {
        Block::Heading { level, id, content } => {
            out.push_str(&format!("#heading(level: {})[", level));
            spans_to_typst(content, out);
            out.push(']');
            if let Some(label) = id {
                out.push_str(&format!(" <{}>", label));
            }
            out.push_str("\n\n");
        }
        Block::Paragraph { content } => {
            spans_to_typst(content, out);
            out.push_str("\n\n");
        }
        Block::CodeBlock { language, content } => {
            let code = content.strip_suffix('\n').unwrap_or(content);
            let mut raw = String::from("#raw(block: true, ");
            if let Some(lang) = language {
                raw.push_str(&format!("lang: {}, ", string_literal(lang)));
            }
            raw.push_str(&string_literal(code));
            raw.push(')');

            // Keep short code blocks together
            if code.lines().count() <= UNBREAKABLE_CODE_LINES {
                out.push_str("#block(breakable: false)[\n");
                out.push_str(&raw);
                out.push_str("\n]\n\n");
            } else {
                out.push_str(&raw);
                out.push_str("\n\n");
            }
        }
        Block::List(list) => {
            // Wrap list to keep together when small, allow breaks when large
            let item_count = count_list_items(list);
            if item_count <= 5 {
                out.push_str("#block(breakable: false)[\n");
                list_to_typst(list, out);
                out.push_str("]\n\n");
            } else {
                list_to_typst(list, out);
                out.push('\n');
            }
        }
        Block::Table {
            alignments,
            headers,
            rows,
        } => {
            // Keep tables together when possible
            out.push_str("#block(breakable: false)[\n");
            table_to_typst(alignments, headers, rows, out);
            out.push_str("]\n\n");
        }
        Block::BlockQuote(blocks) => {
            out.push_str("#quote(block: true)[\n");
            out.push_str(&content_markup(blocks));
            out.push_str("\n]\n\n");
        }
        Block::DefinitionList(definitions) => {
            for definition in definitions {
                definition_to_typst(definition, out);
            }
        }
        Block::Rule => {
            out.push_str("#line(length: 100%)\n\n");
        }
    }
}

/// Markup for nested block content, without trailing paragraph breaks.
fn content_markup(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        emit_block(block, &mut out);
    }
    out.truncate(out.trim_end().len());
    out
}

fn count_list_items(list: &List) -> usize {
    let mut count = list.items.len();
    for item in &list.items {
        for block in &item.blocks {
            if let Block::List(nested) = block {
                count += count_list_items(nested);
            }
        }
    }
    count
}

fn list_to_typst(list: &List, out: &mut String) {
    out.push_str(if list.ordered { "#enum(\n" } else { "#list(\n" });
    out.push_str(&format!("  tight: {},\n", list.tight));
    if let Some(start) = list.start {
        out.push_str(&format!("  start: {},\n", start));
    }
    for item in &list.items {
        out.push_str("  [");
        out.push_str(&content_markup(&item.blocks));
        out.push_str("],\n");
    }
    out.push_str(")\n");
}

fn table_to_typst(
    alignments: &[Alignment],
    headers: &[Vec<Span>],
    rows: &[Vec<Vec<Span>>],
    out: &mut String,
) {
    let col_count = rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(headers.len()))
        .max()
        .unwrap_or(0);
    if col_count == 0 {
        return;
    }

    out.push_str("#table(\n");
    out.push_str(&format!("  columns: {},\n", col_count));

    if alignments.iter().any(|a| *a != Alignment::None) {
        let columns: Vec<&str> = (0..col_count)
            .map(|i| match alignments.get(i) {
                Some(Alignment::Center) => "center",
                Some(Alignment::Right) => "right",
                _ => "left",
            })
            .collect();
        out.push_str(&format!("  align: ({},),\n", columns.join(", ")));
    }

    // Header cells (bold)
    if !headers.is_empty() {
        out.push_str("  table.header(\n");
        for i in 0..col_count {
            out.push_str("    strong[");
            if let Some(cell) = headers.get(i) {
                spans_to_typst(cell, out);
            }
            out.push_str("],\n");
        }
        out.push_str("  ),\n");
    }

    // Data rows, short rows padded with empty cells
    for row in rows {
        for i in 0..col_count {
            out.push_str("  [");
            if let Some(cell) = row.get(i) {
                spans_to_typst(cell, out);
            }
            out.push_str("],\n");
        }
    }

    out.push_str(")\n");
}

fn definition_to_typst(definition: &Definition, out: &mut String) {
    if !definition.term.is_empty() {
        spans_to_typst(&definition.term, out);
        out.push_str("\n\n");
    }
    // dd { margin-left: 40px; }
    for details in &definition.details {
        out.push_str("#pad(left: 30pt)[");
        out.push_str(&content_markup(details));
        out.push_str("]\n\n");
    }
}

fn spans_to_typst(spans: &[Span], out: &mut String) {
    // Set after an embedded expression, which a following `.` or `(` would extend
    let mut after_expr = false;
    for span in spans {
        after_expr = span_to_typst(span, after_expr, out);
    }
}

/// Returns whether the span ended with an embedded expression.
fn span_to_typst(span: &Span, after_expr: bool, out: &mut String) -> bool {
    match span {
        Span::Text(text) => {
            escape_text(text, after_expr, out);
            return false;
        }
        Span::Bold(inner) => call_with_content("strong", inner, out),
        Span::Italic(inner) => call_with_content("emph", inner, out),
        Span::Strikethrough(inner) => call_with_content("strike", inner, out),
        Span::Superscript(inner) => call_with_content("super", inner, out),
        Span::Subscript(inner) => call_with_content("sub", inner, out),
        Span::Code(text) => {
            out.push_str("#raw(");
            out.push_str(&string_literal(text));
            out.push(')');
        }
        Span::Link { url, content } => {
            match url.strip_prefix('#') {
                Some(label) => out.push_str(&format!("#link(<{}>)", label)),
                None => out.push_str(&format!("#link({})", string_literal(url))),
            }
            if !content.is_empty() {
                out.push('[');
                spans_to_typst(content, out);
                out.push(']');
            }
        }
        Span::Image { path, alt } => {
            out.push_str("#box(image(");
            out.push_str(&string_literal(path));
            if !alt.is_empty() {
                out.push_str(", alt: ");
                out.push_str(&string_literal(alt));
            }
            out.push_str("))");
        }
        Span::Footnote(blocks) => {
            out.push_str("#footnote[");
            out.push_str(&content_markup(blocks));
            out.push(']');
        }
        Span::Checkbox(checked) => {
            out.push(if *checked { '☒' } else { '☐' });
            return false;
        }
        Span::LineBreak => {
            out.push_str(" \\\n");
            return false;
        }
    }
    true
}

fn call_with_content(function: &str, inner: &[Span], out: &mut String) {
    out.push('#');
    out.push_str(function);
    out.push('[');
    spans_to_typst(inner, out);
    out.push(']');
}

/// Escape text so none of it is read as markup, code, or math.
///
/// Characters that only matter at the start of a line or in pairs are escaped
/// where they could take effect; a run may start a line.
fn escape_text(text: &str, after_expr: bool, out: &mut String) {
    let chars: Vec<char> = text.chars().collect();
    let mut leading_digits = true;

    for (i, &ch) in chars.iter().enumerate() {
        let next = chars.get(i + 1).copied();
        let escape = match ch {
            '#' | '*' | '_' | '@' | '$' | '\\' | '`' | '<' | '>' | '[' | ']' | '~' => true,
            '-' => i == 0 || matches!(next, Some('-' | '?')),
            '/' => i == 0 || matches!(next, Some('/' | '*')),
            '+' | '=' => i == 0,
            // Enum markers such as `1.` and method calls after an expression
            '.' => (i == 0 && after_expr) || (i > 0 && leading_digits),
            '(' => i == 0 && after_expr,
            _ => false,
        };
        if escape {
            out.push('\\');
        }
        out.push(if ch == '\n' { ' ' } else { ch });
        leading_digits = leading_digits && ch.is_ascii_digit();
    }
}

/// A Typst string literal.
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::markup::build_html;
    use crate::{dom, parser};

    /// Body markup for a Markdown snippet, without the preamble.
    fn typst(markdown: &str) -> String {
        let config = Config::default();
        let document = dom::parse(&build_html(markdown));
        let blocks = parser::parse(&document, Path::new("."));
        let full = blocks_to_typst(&blocks, &config).unwrap();
        full[preamble(&config).unwrap().len()..].to_string()
    }

    #[test]
    fn preamble_follows_config() {
        let mut config = Config::default();
        let default = preamble(&config).unwrap();
        assert!(default.starts_with("#set page(paper: \"a4\", margin: 56.25pt)\n"));
        assert!(default.contains("size: 11pt"));
        assert!(default.contains("rgb(\"#888888\")"));

        config.page.paper = "us-letter".to_string();
        config.page.margin = "1in".to_string();
        assert!(preamble(&config)
            .unwrap()
            .starts_with("#set page(paper: \"us-letter\", margin: 1in)\n"));

        config.page.margin = "lots".to_string();
        assert!(preamble(&config).is_err());
    }

    #[test]
    fn heading() {
        assert_eq!(
            typst("# Hello"),
            "#block(breakable: false)[\n#heading(level: 1)[Hello]\n\n]\n\n"
        );
    }

    #[test]
    fn heading_with_following_content() {
        // Heading should be grouped with following paragraph
        let result = typst("# Title\n\nSome text.");
        assert_eq!(
            result,
            "#block(breakable: false)[\n#heading(level: 1)[Title]\n\nSome text.\n\n]\n\n"
        );
    }

    #[test]
    fn paragraph() {
        assert_eq!(typst("Hello world"), "Hello world\n\n");
    }

    #[test]
    fn bold_and_italic() {
        assert_eq!(typst("**bold**"), "#strong[bold]\n\n");
        assert_eq!(typst("*italic*"), "#emph[italic]\n\n");
        assert_eq!(typst("***both***"), "#emph[#strong[both]]\n\n");
        assert_eq!(typst("~~gone~~ kept"), "\\~\\~gone\\~\\~ kept\n\n");
    }

    #[test]
    fn inline_code() {
        assert_eq!(typst("`code`"), "#raw(\"code\")\n\n");
        assert_eq!(typst("`` a\"b\\c ``"), "#raw(\"a\\\"b\\\\c\")\n\n");
    }

    #[test]
    fn code_block() {
        assert_eq!(
            typst("```rust\nlet x = 1;\n```"),
            "#block(breakable: false)[\n#raw(block: true, lang: \"rust\", \"let x = 1;\")\n]\n\n"
        );
    }

    #[test]
    fn long_code_block_may_break() {
        let code: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let result = typst(&format!("```\n{code}```"));
        assert!(result.starts_with("#raw(block: true, \"line 0\\nline 1\\n"));
        assert!(!result.contains("breakable"));
    }

    #[test]
    fn unordered_list() {
        assert_eq!(
            typst("- one\n- two"),
            "#block(breakable: false)[\n#list(\n  tight: true,\n  [one],\n  [two],\n)\n]\n\n"
        );
    }

    #[test]
    fn ordered_list() {
        assert_eq!(
            typst("1. one\n2. two"),
            "#block(breakable: false)[\n#enum(\n  tight: true,\n  [one],\n  [two],\n)\n]\n\n"
        );
        assert!(typst("4. four\n5. five").contains("  start: 4,\n"));
    }

    #[test]
    fn nested_and_loose_lists() {
        let result = typst("- a\n\n  more\n- b\n  - c\n");
        assert_eq!(
            result,
            "#block(breakable: false)[\n#list(\n  tight: false,\n  [a\n\nmore],\n  [b\n\n#block(breakable: false)[\n#list(\n  tight: true,\n  [c],\n)\n]],\n)\n]\n\n"
        );
    }

    #[test]
    fn large_list_is_breakable() {
        let md: String = (1..=6).map(|i| format!("- item {i}\n")).collect();
        let result = typst(&md);
        assert!(result.starts_with("#list(\n"));
    }

    #[test]
    fn task_list() {
        assert_eq!(
            typst("- [x] done\n- [ ] todo"),
            "#block(breakable: false)[\n#list(\n  tight: true,\n  [☒ done],\n  [☐ todo],\n)\n]\n\n"
        );
    }

    #[test]
    fn hard_break() {
        assert_eq!(typst("line one  \nline two"), "line one \\\nline two\n\n");
    }

    #[test]
    fn escapes_special_chars() {
        assert_eq!(typst("a * b"), "a \\* b\n\n");
        assert_eq!(typst("a # b"), "a \\# b\n\n");
        assert_eq!(typst("a_b"), "a\\_b\n\n");
        assert_eq!(typst("a $ b @c"), "a \\$ b \\@c\n\n");
        assert_eq!(typst("a -- b // c"), "a \\-- b \\// c\n\n");
    }

    #[test]
    fn escapes_line_start_markers() {
        assert_eq!(typst("1\\. not a list"), "1\\. not a list\n\n");
        assert_eq!(typst("\\- not a list"), "\\- not a list\n\n");
        assert_eq!(typst("\\+ plus"), "\\+ plus\n\n");
        assert_eq!(typst("version 1.2"), "version 1.2\n\n");
    }

    #[test]
    fn code_cannot_be_injected() {
        assert_eq!(
            typst("#set page(width: 1pt)"),
            "\\#set page(width: 1pt)\n\n"
        );
        // A parenthesis after a call must not become its argument list
        assert_eq!(typst("**a**(b).c"), "#strong[a]\\(b).c\n\n");
        assert_eq!(typst("`x`.len()"), "#raw(\"x\")\\.len()\n\n");
    }

    #[test]
    fn table() {
        let md = "| A | B |\n|---|---|\n| 1 | 2 |";
        let expected = "#block(breakable: false)[\n#table(\n  columns: 2,\n  table.header(\n    strong[A],\n    strong[B],\n  ),\n  [1],\n  [2],\n)\n]\n\n";
        assert_eq!(typst(md), expected);
    }

    #[test]
    fn table_alignment() {
        let md = "| A | B | C |\n|:--|:-:|--:|\n| 1 | 2 | 3 |";
        assert!(typst(md).contains("  align: (left, center, right,),\n"));
    }

    #[test]
    fn horizontal_rule() {
        assert_eq!(typst("---"), "#line(length: 100%)\n\n");
    }

    #[test]
    fn links() {
        assert_eq!(
            typst("[site](https://example.com/a_b)"),
            "#link(\"https://example.com/a_b\")[site]\n\n"
        );
        assert_eq!(
            typst("<https://example.com>"),
            "#link(\"https://example.com\")[https:\\//example.com]\n\n"
        );
    }

    #[test]
    fn internal_link_to_heading() {
        assert_eq!(
            typst("## Setup {#setup}\n\nSee [setup](#setup)."),
            "#block(breakable: false)[\n#heading(level: 2)[Setup] <setup>\n\nSee #link(<setup>)[setup]\\.\n\n]\n\n"
        );
    }

    #[test]
    fn footnote() {
        assert_eq!(
            typst("Claim[^1].\n\n[^1]: Source."),
            "Claim#footnote[Source.]\\.\n\n"
        );
    }

    #[test]
    fn blockquote() {
        assert_eq!(
            typst("> quoted\n> text"),
            "#quote(block: true)[\nquoted text\n]\n\n"
        );
    }

    #[test]
    fn definition_list() {
        assert_eq!(
            typst("Term\n: Meaning"),
            "Term\n\n#pad(left: 30pt)[Meaning]\n\n"
        );
    }

    #[test]
    fn string_literals() {
        assert_eq!(string_literal("a\"b\\c\nd"), "\"a\\\"b\\\\c\\nd\"");
    }
}
