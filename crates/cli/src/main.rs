//! # gridcalc-cli
//!
//! Command-line interface for recalculating worksheet files.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use gridcalc_core::{CalculationStatus, Calculator, RecalcConfig, DEFAULT_USERCODE};
use gridcalc_http::HttpSheetClient;
use gridcalc_primitives::CellLocation;
use gridcalc_sheet::{worksheet_from_json_value, worksheet_to_api_json, worksheet_to_json_value, Worksheet};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// gridcalc - recalculate a worksheet
#[derive(Parser)]
#[command(name = "gridcalc")]
#[command(author, version, about = "Parallel spreadsheet recalculation", long_about = None)]
struct Cli {
    /// Worksheet JSON file
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Usercode program file (overrides the sheet's own)
    #[arg(short = 'u', long = "usercode", value_name = "FILE")]
    usercode: Option<PathBuf>,

    /// Give up after this many seconds
    #[arg(short = 't', long = "timeout", value_name = "SECS")]
    timeout: Option<f64>,

    /// Worker threads
    #[arg(short = 'w', long = "workers")]
    workers: Option<usize>,

    /// Output format (table, json, api)
    #[arg(short = 'f', long = "format", default_value = "table")]
    format: OutputFormat,

    /// Set a cell before recalculating (A1=VALUE)
    #[arg(short = 's', long = "set", value_name = "A1=VALUE")]
    sets: Vec<String>,

    /// Credentials passed to RUN_WORKSHEET
    #[arg(long = "api-key")]
    api_key: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Output format for results.
#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    /// Cell values, one per line (default)
    #[default]
    Table,
    /// Full worksheet JSON
    Json,
    /// Values-only API JSON
    Api,
}

/// What a run produced.
struct Outcome {
    worksheet: Worksheet,
    status: CalculationStatus,
}

impl Outcome {
    fn succeeded(&self) -> bool {
        self.status.is_completed() && self.worksheet.usercode_error.is_none()
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    let config = build_config(&cli)?;
    let remote = HttpSheetClient::with_timeout(config.timeout)?;
    let calculator = Calculator::new(config).with_remote(Arc::new(remote));

    let format = cli.format;
    let outcome = tokio::task::spawn_blocking(move || run(&cli, &calculator))
        .await
        .context("recalculation thread failed")??;

    print_outcome(&outcome, format)?;
    Ok(if outcome.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Environment settings first, then flags.
fn build_config(cli: &Cli) -> Result<RecalcConfig> {
    let mut config = RecalcConfig::from_env()?;
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }
    if let Some(secs) = cli.timeout {
        let timeout = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("Invalid timeout: {secs}"))?;
        config = config.with_timeout(timeout);
    }
    if let Some(key) = &cli.api_key {
        config = config.with_api_key(key.clone());
    }
    Ok(config)
}

/// Load the sheet, apply `--set` values and recalculate.
fn run(cli: &Cli, calculator: &Calculator) -> Result<Outcome> {
    let (mut worksheet, sheet_usercode) = load_sheet(&cli.file)?;
    let usercode = match &cli.usercode {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read usercode: {}", path.display()))?,
        None => sheet_usercode.unwrap_or_else(|| DEFAULT_USERCODE.to_string()),
    };

    for assignment in &cli.sets {
        let (location, value) = parse_assignment(assignment)?;
        worksheet.set_formula_at(location, value);
    }

    let status = calculator.calculate_with_default_timeout(&mut worksheet, &usercode);
    Ok(Outcome { worksheet, status })
}

/// Read a worksheet file and its embedded `_usercode`, if any.
fn load_sheet(path: &Path) -> Result<(Worksheet, Option<String>)> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let json: JsonValue = serde_json::from_str(&source)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    let worksheet = worksheet_from_json_value(&json)?;
    let usercode = json
        .get("_usercode")
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    Ok((worksheet, usercode))
}

/// Parse `A1=VALUE`.
fn parse_assignment(text: &str) -> Result<(CellLocation, &str)> {
    let (label, value) = text
        .split_once('=')
        .with_context(|| format!("Invalid assignment: '{text}'. Expected A1=VALUE format"))?;
    let location = CellLocation::from_label(label.trim())?;
    Ok((location, value))
}

fn print_outcome(outcome: &Outcome, format: OutputFormat) -> Result<()> {
    let worksheet = &outcome.worksheet;
    match format {
        OutputFormat::Table => {
            for line in format_table(worksheet) {
                println!("{line}");
            }
            let console = worksheet.console().plain_text();
            if !console.is_empty() {
                println!();
                println!("{}", console.trim_end().dimmed());
            }
            if let Some(error) = &worksheet.usercode_error {
                eprintln!(
                    "{} {} (line {})",
                    "Usercode error:".red().bold(),
                    error.message,
                    error.line
                );
            }
            if outcome.status == CalculationStatus::TimedOut {
                eprintln!("{}", "Calculation timed out".red().bold());
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&worksheet_to_json_value(worksheet)?)?
            );
        }
        OutputFormat::Api => {
            println!(
                "{}",
                serde_json::to_string_pretty(&worksheet_to_api_json(worksheet)?)?
            );
        }
    }
    Ok(())
}

/// One line per cell: label, then the formatted value or the error.
fn format_table(worksheet: &Worksheet) -> Vec<String> {
    let width = worksheet
        .locations()
        .map(|location| location.label().len())
        .max()
        .unwrap_or(0);
    worksheet
        .iter()
        .map(|(location, cell)| {
            let label = format!("{:<width$}", location.label());
            match &cell.error {
                Some(error) => format!("{}  {}", label.bold(), error.red()),
                None => format!("{}  {}", label.bold(), cell.formatted_value),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcalc_primitives::Value;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("gridcalc").chain(args.iter().copied()))
    }

    fn sheet_file(contents: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), contents).unwrap();
        file
    }

    // ========================================================================
    // Argument parsing
    // ========================================================================

    #[test]
    fn test_cli_parse_file() {
        let cli = cli(&["sheet.json"]);
        assert_eq!(cli.file, PathBuf::from("sheet.json"));
        assert!(cli.usercode.is_none());
        assert!(!cli.verbose);
        assert!(matches!(cli.format, OutputFormat::Table));
    }

    #[test]
    fn test_cli_parse_options() {
        let cli = cli(&[
            "sheet.json",
            "--timeout",
            "2.5",
            "--workers",
            "4",
            "--format",
            "api",
            "--set",
            "A1=3",
            "-s",
            "B2=x",
            "--api-key",
            "k",
            "-v",
        ]);
        assert_eq!(cli.timeout, Some(2.5));
        assert_eq!(cli.workers, Some(4));
        assert!(matches!(cli.format, OutputFormat::Api));
        assert_eq!(cli.sets, vec!["A1=3", "B2=x"]);
        assert!(cli.verbose);

        let config = build_config(&cli).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_negative_timeout_rejected() {
        assert!(build_config(&cli(&["sheet.json", "--timeout=-1"])).is_err());
    }

    #[test]
    fn test_parse_assignment() {
        let (location, value) = parse_assignment("B3==A1*2").unwrap();
        assert_eq!(location, CellLocation::new(2, 3));
        assert_eq!(value, "=A1*2");
        assert!(parse_assignment("B3").is_err());
        assert!(parse_assignment("3B=1").is_err());
    }

    // ========================================================================
    // Running sheets
    // ========================================================================

    #[test]
    fn test_run_with_overrides() {
        let file = sheet_file(r#"{"1,1": {"formula": "2"}, "1,2": {"formula": "=A1*10"}}"#);
        let path = file.path().to_str().unwrap();
        let cli = cli(&[path, "--set", "A1=5"]);

        let outcome = run(&cli, &Calculator::default()).unwrap();
        assert!(outcome.succeeded());
        assert_eq!(
            outcome.worksheet.value(CellLocation::new(1, 2)),
            Value::Int(50)
        );
    }

    #[test]
    fn test_empty_override_removes_cell() {
        let file = sheet_file(r#"{"1,1": {"formula": "2"}, "1,2": {"formula": "=A1*10"}}"#);
        let cli = cli(&[file.path().to_str().unwrap(), "--set", "A1="]);

        let outcome = run(&cli, &Calculator::default()).unwrap();
        assert!(!outcome.worksheet.contains(CellLocation::new(1, 1)));
    }

    #[test]
    fn test_run_uses_embedded_usercode() {
        let file = sheet_file(
            r#"{"1,1": {"formula": "2"}, "_usercode": "load_constants()\nB1 = A1 + 1\n"}"#,
        );
        let cli = cli(&[file.path().to_str().unwrap()]);

        let outcome = run(&cli, &Calculator::default()).unwrap();
        assert_eq!(
            outcome.worksheet.value(CellLocation::new(2, 1)),
            Value::Int(3)
        );
    }

    #[test]
    fn test_usercode_error_fails_run() {
        let file = sheet_file(r#"{"1,1": {"formula": "2"}}"#);
        let usercode = sheet_file("load_constants()\nprint(A1 / 0)\n");
        let cli = cli(&[
            file.path().to_str().unwrap(),
            "--usercode",
            usercode.path().to_str().unwrap(),
        ]);

        let outcome = run(&cli, &Calculator::default()).unwrap();
        assert!(!outcome.succeeded());
        assert_eq!(outcome.worksheet.usercode_error.as_ref().unwrap().line, 2);
    }

    #[test]
    fn test_missing_file() {
        let cli = cli(&["/definitely/not/here.json"]);
        assert!(run(&cli, &Calculator::default()).is_err());
    }

    #[test]
    fn test_format_table() {
        colored::control::set_override(false);
        let mut worksheet = Worksheet::new();
        worksheet.set_formula("A1", "=1").unwrap();
        worksheet.set_formula("AA10", "=1/0").unwrap();
        Calculator::default().calculate(&mut worksheet, DEFAULT_USERCODE);

        let lines = format_table(&worksheet);
        assert_eq!(lines[0], "A1    1");
        assert_eq!(lines[1], "AA10  ZeroDivisionError: division by zero");
    }
}
