use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::markup::build_html_with_config;
use crate::render::render_pdf;

/// Convert the Markdown file at `input` into a PDF at `output`.
///
/// Missing parent directories of `output` are created. Nothing is written
/// when `input` does not exist; a rendering failure leaves no output file.
pub fn convert(input: &Path, output: &Path, config: &Config) -> Result<()> {
    if !input.exists() {
        return Err(Error::InputNotFound(input.to_path_buf()));
    }

    log::info!("reading {}", input.display());
    let markdown = fs::read_to_string(input)?;
    let html = build_html_with_config(&markdown, &config.markdown);
    log::debug!("built {} bytes of HTML", html.len());

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let base_dir = match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let pdf = render_pdf(&html, base_dir, config)?;

    log::info!("writing {} bytes to {}", pdf.len(), output.display());
    fs::write(output, pdf)?;
    Ok(())
}
