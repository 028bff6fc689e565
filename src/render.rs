use std::fs;
use std::path::Path;

use typst_as_lib::TypstEngine;
use typst_as_lib::typst_kit_options::TypstKitFontOptions;
use typst_library::layout::PagedDocument;
use typst_pdf::PdfOptions;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::{dom, parser, typst};

/// Convert an HTML document to Typst markup.
///
/// `base_dir` is where relative references such as images are looked up.
pub fn html_to_typst(html: &str, base_dir: &Path, config: &Config) -> Result<String> {
    let document = dom::parse(html);
    let blocks = parser::parse(&document, base_dir);
    log::debug!("read {} top-level blocks from HTML", blocks.len());
    typst::blocks_to_typst(&blocks, config)
}

/// Compile an HTML document to a paged Typst document.
fn compile_document(html: &str, base_dir: &Path, config: &Config) -> Result<PagedDocument> {
    let typst_content = html_to_typst(html, base_dir, config)?;
    let root = fs::canonicalize(base_dir).unwrap_or_else(|_| base_dir.to_path_buf());

    let font_options = TypstKitFontOptions::new()
        .include_embedded_fonts(true)
        .include_system_fonts(config.fonts.system);

    let engine = TypstEngine::builder()
        .main_file(typst_content)
        .search_fonts_with(font_options)
        .with_file_system_resolver(root)
        .build();

    let compiled = engine.compile();
    for warning in &compiled.warnings {
        log::warn!("typst: {}", warning.message);
    }

    let doc: PagedDocument = compiled
        .output
        .map_err(|e| Error::Compile(format!("{:?}", e)))?;
    log::debug!("laid out {} pages", doc.pages.len());
    Ok(doc)
}

/// Render an HTML document to PDF bytes.
///
/// Output is deterministic: the same input always yields the same bytes.
pub fn render_pdf(html: &str, base_dir: &Path, config: &Config) -> Result<Vec<u8>> {
    let doc = compile_document(html, base_dir, config)?;

    typst_pdf::pdf(&doc, &PdfOptions::default())
        .map_err(|e| Error::Pdf(format!("{:?}", e)))
}
