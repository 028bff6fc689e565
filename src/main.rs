use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;

use md2pdf::Config;

#[derive(Parser)]
#[command(name = "md2pdf")]
#[command(about = "Convert Markdown files to PDF")]
struct Cli {
    /// Input Markdown file
    input: PathBuf,

    /// Output PDF file (defaults to input name with .pdf extension)
    output: Option<PathBuf>,

    /// TOML file overriding the default page and font settings
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn run(cli: Cli) -> anyhow::Result<PathBuf> {
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::compiled_default(),
    };

    let output = cli
        .output
        .unwrap_or_else(|| cli.input.with_extension("pdf"));

    md2pdf::convert(&cli.input, &output, &config)?;
    Ok(output)
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(output) => println!("Created {}", output.display()),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
