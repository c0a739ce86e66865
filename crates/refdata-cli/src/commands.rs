use crate::config::{Config, OutputFormat};
use ahash::AHashSet;
use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{Cell, Color, Table as ComfyTable};
use refdata_cache::{load_query, Dataset, FreshnessCache};
use refdata_core::Record;
use refdata_executor::{JsonFileExecutor, TimeoutExecutor};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Executor stack the CLI serves from
pub type SourceExecutor = TimeoutExecutor<JsonFileExecutor>;

/// Wire the configured source, probe and data query into a dataset
pub fn open_dataset(config: &Config) -> Result<Dataset<SourceExecutor>> {
    let probe_query = load_query(&config.probe_query)?;
    let executor = TimeoutExecutor::new(
        JsonFileExecutor::new(&config.source),
        config.query_timeout(),
    );
    let cache = Arc::new(FreshnessCache::new(
        executor,
        config.freshness_config(probe_query),
    ));
    let dataset = Dataset::from_file(&config.dataset_name, &config.data_query, cache)?;
    Ok(dataset)
}

pub async fn fetch(config: &Config, format: OutputFormat, out: Option<&Path>) -> Result<()> {
    let dataset = open_dataset(config)?;
    let start = Instant::now();

    let rows = dataset
        .get_fresh_data_if_needed()
        .await
        .with_context(|| format!("Failed to load dataset '{}'", dataset.name()))?;

    emit(&rows, format, config.max_rows, out)?;

    if config.show_timing {
        eprintln!(
            "{} {} rows in {:.2}ms",
            "✓".bright_green(),
            rows.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
    }

    Ok(())
}

pub async fn show_version(config: &Config) -> Result<()> {
    let dataset = open_dataset(config)?;
    let version = dataset.cache().get_current_version().await?;
    println!("{}", version);
    Ok(())
}

/// Render rows and write them to `out`, or stdout when no path is given
pub fn emit(
    rows: &[Record],
    format: OutputFormat,
    max_rows: usize,
    out: Option<&Path>,
) -> Result<()> {
    let rendered = render(rows, format, max_rows)?;
    match out {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{} Wrote {} rows to {}",
                "✓".bright_green(),
                rows.len(),
                path.display().to_string().bright_cyan()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            if format != OutputFormat::Csv {
                writeln!(stdout)?;
            }
        }
    }
    Ok(())
}

pub fn render(rows: &[Record], format: OutputFormat, max_rows: usize) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(render_table(rows, max_rows)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(rows)?),
        OutputFormat::Csv => {
            let mut buffer = Vec::new();
            write_csv(rows, &mut buffer)?;
            Ok(String::from_utf8(buffer)?)
        }
    }
}

/// Every field name that appears in any record, in first-seen order
fn columns(rows: &[Record]) -> Vec<&str> {
    let mut seen = AHashSet::new();
    let mut header = Vec::new();
    for name in rows.iter().flat_map(|row| row.keys()) {
        if seen.insert(name.as_str()) {
            header.push(name.as_str());
        }
    }
    header
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn write_csv<W: Write>(rows: &[Record], writer: W) -> Result<()> {
    let header = columns(rows);
    if header.is_empty() {
        return Ok(());
    }

    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(&header)?;
    for row in rows {
        writer.write_record(header.iter().map(|field| cell_text(row.get(*field))))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn render_table(rows: &[Record], max_rows: usize) -> String {
    let header = columns(rows);
    if header.is_empty() {
        return "(no rows)".to_string();
    }

    let mut table = ComfyTable::new();
    table.set_header(
        header
            .iter()
            .map(|name| Cell::new(name).fg(Color::Cyan))
            .collect::<Vec<_>>(),
    );

    for row in rows.iter().take(max_rows) {
        table.add_row(
            header
                .iter()
                .map(|field| cell_text(row.get(*field)))
                .collect::<Vec<_>>(),
        );
    }

    let mut rendered = table.to_string();
    if rows.len() > max_rows {
        rendered.push_str(&format!("\n... {} more rows", rows.len() - max_rows));
    }
    rendered
}
