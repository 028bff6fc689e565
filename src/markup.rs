use pulldown_cmark::{Event, Options, Parser, html};

use crate::config::MarkdownConfig;

/// Fixed stylesheet embedded in every generated document.
pub const STYLESHEET: &str = "\
body { font-family: serif; font-size: 11pt; line-height: 1.5; }
code, pre { font-family: monospace; }
pre { white-space: pre-wrap; }
table { border-collapse: collapse; }
th, td { border: 1px solid #888; padding: 4px 6px; }
";

fn markdown_options(config: &MarkdownConfig) -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_DEFINITION_LIST);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
    options.insert(Options::ENABLE_TASKLISTS);
    if config.front_matter {
        options.insert(Options::ENABLE_YAML_STYLE_METADATA_BLOCKS);
    }
    options
}

/// Whether raw HTML opens or closes `html`, `head` or `body`, or declares a doctype.
fn has_shell_tag(raw: &str) -> bool {
    let mut rest = raw;
    while let Some(pos) = rest.find('<') {
        rest = &rest[pos + 1..];
        if let Some(comment) = rest.strip_prefix("!--") {
            rest = comment.find("-->").map_or("", |end| &comment[end + 3..]);
            continue;
        }
        let tag = rest.strip_prefix('/').unwrap_or(rest);
        if tag.starts_with('!') && tag[1..].to_ascii_lowercase().starts_with("doctype") {
            return true;
        }
        let name_len = tag
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(tag.len());
        let name = &tag[..name_len];
        if ["html", "head", "body"]
            .iter()
            .any(|shell| name.eq_ignore_ascii_case(shell))
        {
            return true;
        }
    }
    false
}

/// Transform Markdown into an HTML fragment.
///
/// Raw HTML that would open a second document shell is escaped so the
/// fragment always nests inside one `<head>`/`<body>` pair.
pub fn markdown_to_html_fragment(markdown: &str, config: &MarkdownConfig) -> String {
    let parser = Parser::new_ext(markdown, markdown_options(config)).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) if has_shell_tag(&raw) => Event::Text(raw),
        event => event,
    });
    let mut body = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut body, parser);
    body
}

/// Build a complete HTML document from Markdown using default settings.
pub fn build_html(markdown: &str) -> String {
    build_html_with_config(markdown, &MarkdownConfig::default())
}

/// Build a complete HTML document from Markdown.
pub fn build_html_with_config(markdown: &str, config: &MarkdownConfig) -> String {
    let body = markdown_to_html_fragment(markdown, config);
    format!(
        "<!doctype html>\n\
         <html>\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <style>\n\
         {STYLESHEET}\
         </style>\n\
         </head>\n\
         <body>\n\
         {}\n\
         </body>\n\
         </html>\n",
        body.trim_end()
    )
}
