mod cli;

use dropconvert::config;
use dropconvert::queue::{ConversionQueue, QueueOptions};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use dc_av::{ToolConverter, ToolRegistry, ToolThumbnailer};
use dc_core::events::{Event, EventPayload};
use dc_core::{JobId, JobState, Thumbnailer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "dropconvert=trace,dc_av=debug,dc_core=debug".to_string()
        } else {
            "dropconvert=info,dc_av=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Convert {
            files,
            json,
            concurrency,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert(files, cli.config.as_deref(), json, concurrency))
        }
        Commands::Thumbnail { file, output } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(thumbnail(&file, &output, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("dropconvert {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn convert(
    files: Vec<PathBuf>,
    config_path: Option<&Path>,
    json: bool,
    concurrency: Option<usize>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    let mut options = QueueOptions::from_config(&config);
    if let Some(limit) = concurrency {
        anyhow::ensure!(limit > 0, "--concurrency must be at least 1");
        options = options.with_concurrency(limit);
    }

    let tools = ToolRegistry::discover(&config.tools);
    let converter = Arc::new(ToolConverter::new(tools.clone(), config.conversion.clone()));
    let thumbnailer = Arc::new(ToolThumbnailer::new(tools, config.thumbnails.size));
    let queue = ConversionQueue::start(options, converter, thumbnailer);

    let mut events = queue.subscribe();
    let mut accepted = 0usize;
    let mut rejected = 0usize;
    for outcome in queue.submit(files).await {
        match outcome.result {
            Ok(_) => accepted += 1,
            Err(e) => {
                rejected += 1;
                eprintln!("✗ {}: {}", outcome.path.display(), e);
            }
        }
    }

    if accepted == 0 {
        queue.shutdown().await;
        anyhow::bail!("No files were accepted");
    }

    let mut printer = EventPrinter::new(json);
    let mut failed = 0usize;
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                printer.print(&event)?;
                match &event.payload {
                    EventPayload::JobStateChanged { new_state: JobState::Failed, .. } => failed += 1,
                    EventPayload::QueueDrained => break,
                    _ => {}
                }
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("Failed to listen for Ctrl-C")?;
                interrupted = true;
                eprintln!("Interrupted, cancelling jobs...");
                let queue = queue.clone();
                tokio::spawn(async move { queue.shutdown().await });
            }
        }
    }

    queue.shutdown().await;

    if failed > 0 || rejected > 0 {
        anyhow::bail!("{} job(s) failed, {} file(s) rejected", failed, rejected);
    }
    if interrupted {
        anyhow::bail!("Interrupted");
    }
    Ok(())
}

/// Renders queue events for the terminal.
struct EventPrinter {
    json: bool,
    /// Last printed progress decile per job.
    reported: HashMap<JobId, u32>,
}

impl EventPrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            reported: HashMap::new(),
        }
    }

    fn print(&mut self, event: &Event) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(event)?);
            return Ok(());
        }

        match &event.payload {
            EventPayload::JobAdded {
                job_id,
                source_path,
                kind,
            } => println!("[{}] queued {} ({})", job_id.short(), source_path.display(), kind),
            EventPayload::JobProgress {
                job_id,
                progress,
                speed,
            } => {
                let decile = (progress * 10.0).floor() as u32;
                if self.reported.get(job_id).is_some_and(|d| *d >= decile) {
                    return Ok(());
                }
                self.reported.insert(*job_id, decile);
                println!("{}", progress_line(&job_id.short(), decile, speed.as_deref()));
            }
            EventPayload::JobStateChanged {
                job_id,
                new_state,
                output_path,
                error,
                ..
            } => match new_state {
                JobState::Running => println!("[{}] started", job_id.short()),
                JobState::Done => match output_path {
                    Some(path) => println!("✓ [{}] done -> {}", job_id.short(), path.display()),
                    None => println!("✓ [{}] done", job_id.short()),
                },
                JobState::Failed => match error {
                    Some(reason) => println!("✗ [{}] failed: {}", job_id.short(), reason),
                    None => println!("✗ [{}] failed", job_id.short()),
                },
                JobState::Cancelled => println!("- [{}] cancelled", job_id.short()),
                JobState::Queued => {}
            },
            EventPayload::QueueDrained => println!("All jobs finished"),
            EventPayload::QueuePaused
            | EventPayload::QueueResumed
            | EventPayload::ThumbnailReady { .. } => {}
        }
        Ok(())
    }
}

async fn thumbnail(file: &Path, output: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let tools = ToolRegistry::discover(&config.tools);
    let thumbnailer = ToolThumbnailer::new(tools, config.thumbnails.size);
    let thumbnail = thumbnailer
        .generate(file)
        .await
        .with_context(|| format!("Failed to render thumbnail for {:?}", file))?;

    tokio::fs::write(output, &thumbnail.data)
        .await
        .with_context(|| format!("Failed to write thumbnail: {:?}", output))?;

    println!(
        "Wrote {} ({} bytes, {})",
        output.display(),
        thumbnail.len(),
        thumbnail.mime
    );
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let (config, source) = match path {
        Some(p) => (config::load_config(p)?, p.display().to_string()),
        None => match config::find_config() {
            Some(p) => (config::load_config(&p)?, p.display().to_string()),
            None => (config::Config::default(), "defaults".to_string()),
        },
    };

    println!("Validating config: {}", source);
    println!("✓ Configuration is valid");
    println!("  Concurrency limit: {}", config.queue.concurrency_limit);
    println!("  Reject duplicates: {}", config.queue.reject_duplicates);
    println!(
        "  Hardware accelerator: {}",
        config.conversion.hardware_accelerator
    );
    println!(
        "  Default destination: {}",
        config.conversion.default_dest_dir.display()
    );
    println!("  Thumbnail size: {}px", config.thumbnails.size);

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in warnings {
            println!("  ! {}", warning);
        }
    }

    Ok(())
}

/// `[id]  40% (2.5x)`. ffmpeg speeds already carry their `x`.
fn progress_line(short_id: &str, decile: u32, speed: Option<&str>) -> String {
    match speed {
        Some(speed) => format!("[{}] {:>3}% ({})", short_id, decile * 10, speed),
        None => format!("[{}] {:>3}%", short_id, decile * 10),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_line_shows_speed_once() {
        assert_eq!(progress_line("ab12cd34", 4, Some("2.5x")), "[ab12cd34]  40% (2.5x)");
        assert_eq!(progress_line("ab12cd34", 10, None), "[ab12cd34] 100%");
    }
}
