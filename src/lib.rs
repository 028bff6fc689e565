//! Markdown to PDF conversion.
//!
//! Markdown is transformed into a self-contained HTML document with a fixed
//! stylesheet, which is then typeset to PDF.

mod block;
mod config;
mod convert;
mod dom;
mod error;
mod markup;
mod parser;
mod render;
mod typst;

pub use block::{Alignment, Block, Definition, List, ListItem, Span};
pub use config::{Config, FontConfig, MarkdownConfig, PageConfig};
pub use convert::convert;
pub use error::{Error, Result};
pub use markup::{STYLESHEET, build_html, build_html_with_config, markdown_to_html_fragment};
pub use render::{html_to_typst, render_pdf};

use std::path::Path;

/// Parse an HTML document into blocks, resolving images against `base_dir`.
pub fn parse_html(html: &str, base_dir: &Path) -> Vec<Block> {
    let document = dom::parse(html);
    parser::parse(&document, base_dir)
}

/// Convert Markdown to PDF bytes using default config.
pub fn markdown_to_pdf(markdown: &str, base_dir: &Path) -> Result<Vec<u8>> {
    markdown_to_pdf_with_config(markdown, base_dir, &Config::compiled_default())
}

/// Convert Markdown to PDF bytes with custom config.
pub fn markdown_to_pdf_with_config(
    markdown: &str,
    base_dir: &Path,
    config: &Config,
) -> Result<Vec<u8>> {
    let html = build_html_with_config(markdown, &config.markdown);
    render_pdf(&html, base_dir, config)
}
