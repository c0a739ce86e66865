use crate::commands::{emit, open_dataset, SourceExecutor};
use crate::config::{Config, OutputFormat};
use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{Cell, Color, Table as ComfyTable};
use refdata_cache::{CacheState, Dataset, FreshnessCache};
use refdata_executor::QueryExecutor;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Long-lived session: the cache survives between commands, so repeated
/// fetches only hit the source for the version probe
pub struct Repl {
    config: Config,
    editor: DefaultEditor,
    dataset: Dataset<SourceExecutor>,
    history_file: PathBuf,
}

impl Repl {
    pub fn new(config: Config) -> Result<Self> {
        let history_file = Self::get_history_file()?;
        let mut editor = DefaultEditor::new()?;

        // Missing on first run
        let _ = editor.load_history(&history_file);

        let dataset = open_dataset(&config)?;

        Ok(Self {
            config,
            editor,
            dataset,
            history_file,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        println!(
            "{} {}",
            "Reference dataset:".bright_green().bold(),
            self.dataset.name().bright_cyan()
        );
        println!("Type {} for available commands", ".help".bright_cyan());
        println!();

        loop {
            let prompt = format!("{} ", "refdata>".bright_green().bold());
            let line = match self.editor.readline(&prompt) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("{} {}", "Error:".bright_red().bold(), err);
                    break;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.editor.add_history_entry(line)?;

            match self.handle_command(line).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => eprintln!("{} {:#}", "Error:".bright_red().bold(), e),
            }
        }

        self.editor.save_history(&self.history_file)?;
        Ok(())
    }

    /// Returns `false` when the session should end
    async fn handle_command(&mut self, cmd: &str) -> Result<bool> {
        let parts: Vec<&str> = cmd.split_whitespace().collect();

        match parts[0] {
            ".help" | ".h" => self.show_help(),
            ".quit" | ".q" | ".exit" => return Ok(false),
            ".fetch" => {
                let format = match parts.get(1) {
                    Some(name) => parse_format(name)?,
                    None => self.config.output_format,
                };
                self.fetch(format, None).await?;
            }
            ".csv" => {
                let default_name = format!("{}.csv", self.dataset.name());
                let path = PathBuf::from(parts.get(1).copied().unwrap_or(default_name.as_str()));
                self.fetch(OutputFormat::Csv, Some(&path)).await?;
            }
            ".version" => {
                let version = self.dataset.cache().get_current_version().await?;
                println!("{} {}", "Known-good version:".bright_yellow(), version);
            }
            ".stats" => match parts.get(1) {
                None => self.show_cache_stats(),
                Some(&"reset") => {
                    self.dataset.cache().stats().reset();
                    println!("{} Counters reset", "✓".bright_green());
                }
                Some(other) => anyhow::bail!("Unknown .stats argument: {} (try reset)", other),
            },
            ".invalidate" => {
                let dropped = self.dataset.cache().invalidate_all();
                println!("{} Dropped {} cached result sets", "✓".bright_green(), dropped);
            }
            ".timing" => {
                self.config.show_timing = !self.config.show_timing;
                println!(
                    "Timing is now {}",
                    if self.config.show_timing {
                        "ON".bright_green()
                    } else {
                        "OFF".bright_red()
                    }
                );
            }
            other => anyhow::bail!("Unknown command: {} (try .help)", other),
        }

        Ok(true)
    }

    async fn fetch(&self, format: OutputFormat, out: Option<&Path>) -> Result<()> {
        let start = Instant::now();
        let rows = self
            .dataset
            .get_fresh_data_if_needed()
            .await
            .with_context(|| format!("Failed to load dataset '{}'", self.dataset.name()))?;

        emit(&rows, format, self.config.max_rows, out)?;

        if self.config.show_timing {
            println!(
                "{} {:.2}ms",
                "Time:".bright_yellow(),
                start.elapsed().as_secs_f64() * 1000.0
            );
        }
        Ok(())
    }

    fn show_help(&self) {
        let mut table = ComfyTable::new();
        table.set_header(vec![
            Cell::new("Command").fg(Color::Cyan),
            Cell::new("Description").fg(Color::Yellow),
        ]);
        for (cmd, desc) in HELP {
            table.add_row(vec![*cmd, *desc]);
        }
        println!("{}", table);
    }

    fn show_cache_stats(&self) {
        let cache = self.dataset.cache();
        let mut table = ComfyTable::new();
        table.set_header(vec![
            Cell::new(self.dataset.name()).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Green),
        ]);
        for (metric, value) in stats_rows(&**cache, self.dataset.query()) {
            table.add_row(vec![metric.to_string(), value]);
        }
        println!("{}", table);
    }

    fn get_history_file() -> Result<PathBuf> {
        let home = home::home_dir().context("Could not find home directory")?;
        let history_dir = home.join(".refdata");
        std::fs::create_dir_all(&history_dir)?;
        Ok(history_dir.join("history.txt"))
    }
}

const HELP: &[(&str, &str)] = &[
    (".fetch [table|json|csv]", "Show the dataset, refreshing if the source moved"),
    (".csv [path]", "Write the dataset as CSV"),
    (".version", "Show the known-good source version"),
    (".stats [reset]", "Show cache statistics, or zero the counters"),
    (".invalidate", "Drop every cached result set"),
    (".timing", "Toggle timing display"),
    (".help, .h", "List commands"),
    (".quit, .q, .exit", "Leave the session"),
];

fn parse_format(name: &str) -> Result<OutputFormat> {
    OutputFormat::from_str(name, true)
        .map_err(|e| anyhow::anyhow!("Unknown output format: {}", e))
}

/// Metric rows for `.stats`: store state, the entry behind `query`, then the counters
fn stats_rows<E: QueryExecutor>(
    cache: &FreshnessCache<E>,
    query: &str,
) -> Vec<(&'static str, String)> {
    let snapshot = cache.stats().snapshot();
    let version = match cache.state() {
        CacheState::Fresh { version } => version.to_string(),
        CacheState::Empty => "(none)".to_string(),
    };
    let last_invalidation = cache
        .last_invalidation()
        .map(|event| event.to_string())
        .unwrap_or_else(|| "(never)".to_string());

    let mut rows = vec![
        ("Known-good version", version),
        ("Last invalidation", last_invalidation),
        ("Entries", snapshot.entry_count.to_string()),
    ];

    if let Some(entry) = cache.entry_summary(query) {
        rows.push(("Dataset rows", entry.rows.to_string()));
        rows.push(("Dataset served from cache", entry.hit_count.to_string()));
        rows.push(("Dataset age", format!("{:.1}s", entry.age.as_secs_f64())));
    }

    rows.extend([
        ("Requests", snapshot.total_requests().to_string()),
        ("Hits", snapshot.hits.to_string()),
        ("Misses", snapshot.misses.to_string()),
        ("Hit rate", format!("{:.1}%", snapshot.hit_rate() * 100.0)),
        ("Coalesced", snapshot.coalesced.to_string()),
        ("Recomputations", snapshot.recomputations.to_string()),
        ("Probes", snapshot.probes.to_string()),
        ("Probe failures", snapshot.probe_failures.to_string()),
        ("Invalidations", snapshot.invalidations.to_string()),
        ("Evictions", snapshot.evictions.to_string()),
    ]);
    rows
}
