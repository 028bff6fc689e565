use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

static DEFAULT_CONFIG: &str = include_str!("default_config.toml");

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub page: PageConfig,
    pub fonts: FontConfig,
    pub markdown: MarkdownConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PageConfig {
    pub paper: String,
    pub margin: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            paper: "a4".to_string(),
            margin: "56.25pt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct FontConfig {
    /// Also search fonts installed on the host.
    pub system: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarkdownConfig {
    /// Drop a leading YAML front matter block.
    pub front_matter: bool,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self { front_matter: true }
    }
}

impl PageConfig {
    /// The margin as a typesetter length literal, e.g. `2cm`.
    pub fn margin_length(&self) -> Result<String> {
        parse_length(&self.margin)
            .ok_or_else(|| Error::Config(format!("invalid page margin {:?}", self.margin)))
    }
}

impl Config {
    /// The defaults shipped in `default_config.toml`.
    pub fn compiled_default() -> Self {
        // build.rs rejects a malformed default file, so this never falls back in practice
        toml::from_str(DEFAULT_CONFIG).unwrap_or_default()
    }

    /// Load config from a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.page.paper.trim().is_empty() {
            return Err(Error::Config("page paper must not be empty".to_string()));
        }
        self.page.margin_length().map(|_| ())
    }
}

/// Accepts `<number><unit>` with an absolute unit and returns it normalized.
fn parse_length(value: &str) -> Option<String> {
    let value = value.trim();
    let split = value.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = value.split_at(split);
    let number: f64 = number.trim().parse().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    match unit {
        "pt" | "mm" | "cm" | "in" => Some(format!("{number}{unit}")),
        // CSS pixels, 96 per inch
        "px" => Some(format!("{}pt", number * 0.75)),
        _ => None,
    }
}
