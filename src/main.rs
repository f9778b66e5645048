//! Command-line entry point: generate, revise, import, and model listing.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use coursemap::application::events::{Phase, ProgressEvent};
use coursemap::application::generation::{GenerationOrchestrator, GenerationOutcome};
use coursemap::application::revision::{RevisionOrchestrator, RevisionOutcome};
use coursemap::domain::CourseMap;
use coursemap::infra::app_config::{self, AppConfig};
use coursemap::infra::import::import_course_map;
use coursemap::infra::notify::LogNotifier;
use coursemap::infra::source::PlainTextReader;
use coursemap::infra::stream::{HttpTransport, Provider, ProviderSettings, list_models};
use coursemap::state::Session;

#[derive(Parser)]
#[command(name = "coursemap", version, about = "Turn course documents into a structured course map")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a course map from syllabus / course material files.
    Generate {
        /// Source documents (plain text or markdown).
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        /// Write the course map JSON here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Revise an existing course map JSON with a chat instruction.
    Revise {
        /// Course map JSON produced by a previous run.
        map: PathBuf,
        /// What to change (or ask).
        message: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List chat-capable models from the configured provider.
    Models {
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Import a course map from a CSV export.
    Import {
        file: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime")?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Generate { files, provider, model, api_key, output } => {
            let settings = resolve_settings(provider, model, api_key)?;
            generate(settings, files, output).await
        }
        Command::Revise { map, message, provider, model, api_key, output } => {
            let settings = resolve_settings(provider, model, api_key)?;
            revise(settings, map, message, output).await
        }
        Command::Models { provider, api_key } => {
            // The model id is irrelevant for listing.
            let settings = resolve_settings(provider, Some(String::new()), api_key)?;
            let models = list_models(&settings).await?;
            for model in models {
                println!("{}\t{}", model.id, model.label);
            }
            Ok(())
        }
        Command::Import { file, output } => {
            let map = import_course_map(&file)?;
            write_map(&map, output.as_deref())
        }
    }
}

/// Merge CLI flags over the saved config; flags that were given are
/// written back so the next run can omit them.
fn resolve_settings(
    provider: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
) -> anyhow::Result<ProviderSettings> {
    let mut config = app_config::load_config();
    let flags_given = provider.is_some() || model.is_some() || api_key.is_some();

    let provider_name = provider
        .or_else(|| config.provider.clone())
        .context("no provider configured; pass --provider openai|anthropic|google")?;
    let provider: Provider = provider_name.parse()?;

    let model_id = model
        .or_else(|| config.model_id.clone())
        .context("no model configured; pass --model")?;

    let api_key = api_key
        .or_else(|| config.api_key_for(&provider.to_string()).map(str::to_string))
        .or_else(|| std::env::var(env_key_var(provider)).ok())
        .with_context(|| format!("no API key for {provider}; pass --api-key or set {}", env_key_var(provider)))?;

    if flags_given {
        remember_settings(&mut config, provider, &model_id, &api_key);
    }

    Ok(ProviderSettings { provider, model_id, api_key })
}

fn env_key_var(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "OPENAI_API_KEY",
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::Google => "GOOGLE_API_KEY",
    }
}

fn remember_settings(config: &mut AppConfig, provider: Provider, model_id: &str, api_key: &str) {
    config.provider = Some(provider.to_string());
    if !model_id.is_empty() {
        config.model_id = Some(model_id.to_string());
    }
    match provider {
        Provider::OpenAi => config.openai_api_key = Some(api_key.to_string()),
        Provider::Anthropic => config.anthropic_api_key = Some(api_key.to_string()),
        Provider::Google => config.google_api_key = Some(api_key.to_string()),
    }
    if let Err(err) = app_config::save_config(config) {
        log::warn!("could not save config: {err}");
    }
}

async fn generate(
    settings: ProviderSettings,
    files: Vec<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_progress(rx));

    let mut session = Session::new();
    let mut orchestrator = GenerationOrchestrator::new(
        settings,
        Arc::new(HttpTransport::new()),
        Arc::new(LogNotifier),
        Some(tx),
    );

    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let outcome = orchestrator
        .generate(&mut session, &PlainTextReader, &files)
        .await?;
    drop(orchestrator);
    let _ = printer.await;

    match outcome {
        GenerationOutcome::Completed => {}
        GenerationOutcome::Stopped => {
            eprintln!("Stopped; writing the partial course map.");
        }
    }
    match session.course_map {
        Some(map) => write_map(&map, output.as_deref()),
        None => anyhow::bail!("generation produced no course map"),
    }
}

async fn revise(
    settings: ProviderSettings,
    map_path: PathBuf,
    message: String,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&map_path)
        .with_context(|| format!("could not read {}", map_path.display()))?;
    let map: CourseMap = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a course map JSON", map_path.display()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_progress(rx));

    let mut session = Session::new();
    session.import(map);
    let mut orchestrator =
        RevisionOrchestrator::new(settings, Arc::new(HttpTransport::new()), Some(tx));

    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let outcome = orchestrator.revise(&mut session, &message, &[]).await?;
    drop(orchestrator);
    let _ = printer.await;

    match outcome {
        RevisionOutcome::ChatReply(reply) => {
            println!("{reply}");
            Ok(())
        }
        RevisionOutcome::Applied { changes } => {
            eprintln!("Applied {changes} change(s).");
            match session.course_map {
                Some(map) => write_map(&map, output.as_deref().or(Some(map_path.as_path()))),
                None => anyhow::bail!("revision produced no course map"),
            }
        }
        RevisionOutcome::Stopped => {
            eprintln!("Stopped before the revision finished; the map is unchanged on disk.");
            Ok(())
        }
    }
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Phase(Phase::Parsing) => eprintln!("Reading source files..."),
            ProgressEvent::Phase(Phase::Generating) => eprintln!("Generating..."),
            ProgressEvent::Phase(Phase::Examining) => eprintln!("Examining..."),
            ProgressEvent::Phase(Phase::Failed(msg)) => eprintln!("Failed: {msg}"),
            ProgressEvent::Phase(_) => {}
            ProgressEvent::Detail(detail) => eprintln!("  {detail}"),
            ProgressEvent::Percent(_) | ProgressEvent::Preview(_) => {}
            ProgressEvent::Retry { attempt, max, delay_ms } => {
                eprintln!("  retry {attempt}/{max} in {delay_ms}ms")
            }
            ProgressEvent::Warning(warning) => eprintln!("Warning: {warning}"),
            ProgressEvent::Changes(changes) => {
                for change in changes {
                    eprintln!("  fix: {change}");
                }
            }
            ProgressEvent::ExamineSkipped { reason } => {
                eprintln!("Examine pass skipped: {reason}")
            }
        }
    }
}

fn write_map(map: &CourseMap, output: Option<&std::path::Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(map)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("could not write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
