use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use segscribe::audio::WavFileSource;
use segscribe::backend::HttpBackend;
use segscribe::cli::{Cli, Commands};
use segscribe::config::Config;
use segscribe::pipeline::BatchPipeline;
use segscribe::scheduler::PipelineEvent;
use segscribe::store::{FileManifestStore, ManifestStore};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Transcribe {
            file,
            endpoint,
            language,
            model,
        } => {
            if let Some(endpoint) = endpoint {
                config.backend.endpoint = endpoint;
            }
            if let Some(language) = language {
                config.backend.language = language;
            }
            if let Some(model) = model {
                config.backend.model = model;
            }
            config.validate()?;
            run_transcribe(&config, &file).await?;
        }
        Commands::ListRecoverable => {
            list_recoverable_runs().await?;
        }
        Commands::Resume {
            pipeline_id,
            retry_failed,
        } => {
            run_resume(&config, &pipeline_id, retry_failed).await?;
        }
    }

    Ok(())
}

/// Logs go to stderr so the merged transcript on stdout stays pipeable.
fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "segscribe=info",
        1 => "segscribe=debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store() -> Result<Arc<FileManifestStore>> {
    let root = FileManifestStore::default_root()
        .context("could not determine a data directory for recovery manifests")?;
    Ok(Arc::new(FileManifestStore::new(root)))
}

fn build_backend(config: &Config) -> Result<Arc<HttpBackend>> {
    let backend = HttpBackend::new(
        &config.backend.endpoint,
        std::time::Duration::from_secs(config.scheduler.backend_timeout_secs),
    )?;
    Ok(Arc::new(backend))
}

fn new_pipeline_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S%3f"))
}

async fn run_transcribe(config: &Config, file: &Path) -> Result<()> {
    let store = open_store()?;
    let backend = build_backend(config)?;
    let mut source = WavFileSource::new(file, config.segmenting.sample_rate);
    let pipeline_id = new_pipeline_id();

    let (pipeline, events) = BatchPipeline::start(
        config,
        store,
        backend,
        &mut source,
        pipeline_id.clone(),
        None,
    )
    .await?;

    render_events(events, &pipeline_id).await?;
    pipeline.wait().await;
    Ok(())
}

async fn run_resume(config: &Config, pipeline_id: &str, retry_failed: bool) -> Result<()> {
    let store = open_store()?;
    let backend = build_backend(config)?;

    let (pipeline, events) =
        BatchPipeline::resume(config, store, backend, pipeline_id, retry_failed).await?;

    render_events(events, pipeline_id).await?;
    pipeline.wait().await;
    Ok(())
}

async fn list_recoverable_runs() -> Result<()> {
    let store = open_store()?;
    let ids = store.list_recoverable().await?;

    if ids.is_empty() {
        println!("No recoverable runs.");
        return Ok(());
    }

    println!("Recoverable runs:");
    for id in ids {
        match store.load(&id).await {
            Ok(manifest) => {
                let done = manifest.jobs.iter().filter(|j| !j.is_unresolved()).count();
                println!(
                    "  {}  ({}/{} segments done, last update {})",
                    id,
                    done,
                    manifest.jobs.len(),
                    manifest.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            Err(e) => {
                eprintln!("  {}  (unreadable: {})", id, e);
            }
        }
    }
    println!();
    println!("Resume with: segscribe resume <pipeline-id>");
    Ok(())
}

/// Drains the event stream: progress to stderr, the final transcript to
/// stdout. Returns an error on a fatal event.
async fn render_events(
    mut events: mpsc::UnboundedReceiver<PipelineEvent>,
    pipeline_id: &str,
) -> Result<()> {
    let mut last_percent = -1i32;
    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Progress(progress) => {
                let percent = (progress.progress_fraction * 100.0).round() as i32;
                if percent != last_percent {
                    last_percent = percent;
                    eprintln!("[{:>3}%] {}", percent, progress.stage_label);
                }
            }
            PipelineEvent::Finished(report) => {
                if !report.failed_segments.is_empty() {
                    eprintln!(
                        "Warning: {} of {} segments failed permanently: {:?}",
                        report.failed_segments.len(),
                        report.total_segments,
                        report.failed_segments
                    );
                    eprintln!(
                        "Rerun them with: segscribe resume --retry-failed {}",
                        pipeline_id
                    );
                }
                println!("{}", report.merged_text);
                return Ok(());
            }
            PipelineEvent::Fatal(e) => {
                return Err(e).context("pipeline aborted");
            }
        }
    }
    anyhow::bail!("pipeline ended without producing a result")
}
