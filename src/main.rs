use anyhow::{Context, Result, bail};
use clap::Parser;
use railchess::aarc::parse_geomap;
use railchess::converter::convert_to_rc;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "AARC to RC map converter", long_about = None)]
struct Args {
    /// Input AARC document
    input: Option<PathBuf>,
    /// Output RC document
    output: Option<PathBuf>,
    /// Conversion config document
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let (input, output, config) = match (args.input, args.output) {
        (Some(input), Some(output)) => (input, output, args.config),
        (None, None) => {
            println!("AARC to RC map converter");
            let input = prompt("Enter input AARC file path: ")?;
            let output = prompt("Enter output RC file path:  ")?;
            let config = prompt("Enter config JSON file path (or leave empty for default): ")?;
            (
                PathBuf::from(input),
                PathBuf::from(output),
                (!config.is_empty()).then(|| PathBuf::from(config)),
            )
        }
        _ => bail!("provide both an input and an output path, or neither"),
    };

    let aarc: Value = serde_json::from_slice(
        &fs::read(&input).with_context(|| format!("failed to open input file {input:?}"))?,
    )
    .context("input is not valid JSON")?;

    let config_value: Value = match config {
        Some(path) => serde_json::from_slice(
            &fs::read(&path).with_context(|| format!("failed to open config file {path:?}"))?,
        )
        .context("config is not valid JSON")?,
        None => Value::Null,
    };

    let geomap = parse_geomap(&aarc, &config_value)?;
    let rcmap = convert_to_rc(&geomap);

    fs::write(&output, serde_json::to_string_pretty(&rcmap.to_json())?)
        .with_context(|| format!("failed to write output file {output:?}"))?;
    Ok(())
}
