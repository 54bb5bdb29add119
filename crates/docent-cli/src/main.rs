//! docent - document assistant CLI

mod commands;
mod config;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use docent_agent::agents::{FileAgent, FunctionAgent, MultimediaAgent, SearchAgent};
use docent_agent::capability::{
    DisabledSearch, GoogleSearch, InMemoryStore, PlainTextExtractor, SharedSearch,
};
use docent_agent::{
    AgentRegistry, Concierge, ConciergeConfig, ConversationStore, RagOrchestrator,
    Response, TaskEngine, TaskEvent, spawn_sweeper,
};
use docent_ai::{Provider, ProviderSettings, SharedGenerator, build_generator};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// docent - chat with your documents
#[derive(Parser, Debug)]
#[command(name = "docent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Provider (google, openai, anthropic, groq, openrouter, ollama)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model to use (default depends on the provider)
    #[arg(short, long)]
    model: Option<String>,

    /// Run in non-interactive mode with a single message
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Session id (default: a fresh one per run)
    #[arg(short, long)]
    session: Option<String>,

    /// Name to introduce yourself with in non-interactive mode
    #[arg(long)]
    name: Option<String>,

    /// Directory for uploaded documents and media
    #[arg(short, long)]
    upload_dir: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// Everything the REPL talks to
struct App {
    concierge: Concierge,
    files: Arc<FileAgent>,
    media: Arc<MultimediaAgent>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "docent=debug,docent_agent=debug,docent_ai=debug"
    } else {
        "docent=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn provider_settings(args: &Args, cfg: &config::Config) -> anyhow::Result<ProviderSettings> {
    let provider: Provider = args
        .provider
        .as_deref()
        .or(cfg.provider.as_deref())
        .unwrap_or("google")
        .parse()?;

    let mut settings = ProviderSettings::new(provider);
    if let Some(model) = args.model.as_ref().or(cfg.model.as_ref()) {
        settings.models.default = model.clone();
    }
    for (task, model) in cfg.model_overrides() {
        settings.models = settings.models.with_override(task, model);
    }
    settings.api_key = cfg.api_key(&provider.to_string());
    settings.base_url = cfg.base_url.clone();
    settings.timeout = Duration::from_secs(cfg.request_timeout_secs());
    Ok(settings)
}

fn build_app(cfg: &config::Config, generator: SharedGenerator, upload_dir: &Path) -> App {
    let store = Arc::new(InMemoryStore::new());
    let search: SharedSearch = match cfg.search_credentials() {
        Some((key, engine)) => Arc::new(GoogleSearch::new(key, engine)),
        None => GoogleSearch::from_env()
            .map(|s| Arc::new(s) as SharedSearch)
            .unwrap_or_else(|| Arc::new(DisabledSearch)),
    };

    let rag = Arc::new(RagOrchestrator::new(
        store.clone(),
        generator.clone(),
        search,
        cfg.rag.clone(),
    ));
    let profiles = &cfg.profiles;
    let files = Arc::new(
        FileAgent::new(
            upload_dir,
            store,
            Arc::new(PlainTextExtractor::new()),
            cfg.chunking.clone(),
        )
        .with_max_upload_bytes(cfg.max_upload_bytes()),
    );
    let media = Arc::new(
        MultimediaAgent::new(upload_dir).with_max_upload_bytes(cfg.max_upload_bytes()),
    );
    let agents = AgentRegistry::new(
        Arc::new(SearchAgent::new(rag.clone()).with_profile(profiles.search)),
        files.clone(),
        Arc::new(
            FunctionAgent::new()
                .with_generator(generator.clone())
                .with_profile(profiles.function),
        ),
        media.clone(),
    );

    let tasks = Arc::new(TaskEngine::new(generator.clone(), agents, cfg.tasks.clone()));
    let conversations = Arc::new(ConversationStore::new(cfg.conversation.clone()));
    let concierge = Concierge::new(
        conversations,
        rag,
        tasks,
        generator,
        ConciergeConfig::default(),
    )
    .with_profile(profiles.concierge);

    App {
        concierge,
        files,
        media,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let settings = provider_settings(&args, &cfg)?;
    let generator = match build_generator(&settings) {
        Ok(generator) => generator,
        Err(docent_ai::Error::InvalidApiKey) => {
            let vars = settings.provider.api_key_env_vars().join(" or ");
            eprintln!("Error: No API key found for {}", settings.provider.name());
            eprintln!();
            eprintln!("Set your API key with: export {}=your-key", vars);
            eprintln!("Or add it to config file: docent --init-config");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let upload_dir = args
        .upload_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| cfg.upload_dir());
    let app = build_app(&cfg, generator, &upload_dir);
    let session_id = args
        .session
        .clone()
        .unwrap_or_else(new_session_id);

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(
        app.concierge.conversations().clone(),
        app.concierge.tasks().clone(),
        SWEEP_INTERVAL,
        cancel.clone(),
    );
    let progress = spawn_progress_printer(app.concierge.tasks());

    let result = match args.command {
        Some(ref command) => {
            let name = args
                .name
                .clone()
                .or_else(|| std::env::var("USER").ok())
                .unwrap_or_else(|| "user".to_string());
            run_command(&app, &session_id, &name, command).await
        }
        None => run_interactive(&app, &session_id, &settings).await,
    };

    cancel.cancel();
    sweeper.await.ok();
    progress.abort();
    result
}

fn new_session_id() -> String {
    format!("cli-{}", chrono::Utc::now().format("%Y%m%d%H%M%S%3f"))
}

/// Print task progress to stderr while tasks run
fn spawn_progress_printer(tasks: &TaskEngine) -> tokio::task::JoinHandle<()> {
    let mut receiver = tasks.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            match event {
                TaskEvent::PlanReady { total_steps, .. } => {
                    eprintln!("[Planned {} steps]", total_steps);
                }
                TaskEvent::StepStarted {
                    step_number,
                    agent,
                    attempt,
                    ..
                } => {
                    if attempt > 1 {
                        eprintln!(
                            "[Step {} ({}) attempt {}...]",
                            step_number,
                            agent.name(),
                            attempt
                        );
                    } else {
                        eprintln!("[Step {} ({})...]", step_number, agent.name());
                    }
                }
                TaskEvent::StepFailed {
                    step_number, error, ..
                } => {
                    eprintln!("[Step {} failed: {}]", step_number, error);
                }
                TaskEvent::TaskCancelled { task_id } => {
                    eprintln!("[Task {} cancelled]", task_id);
                }
                _ => {}
            }
        }
    })
}

fn print_response(response: &Response) {
    if response.error {
        eprintln!("Error: {}", response.text);
        return;
    }
    println!("{}", response.text);
    if !response.sources.is_empty() {
        println!("\n[Sources: {}]", response.sources.join(", "));
    }
}

async fn run_command(app: &App, session_id: &str, name: &str, command: &str) -> anyhow::Result<()> {
    // Walk through the first-contact exchange before the real message
    let conversation = app.concierge.conversations().get_or_create(session_id);
    if conversation.messages.is_empty() {
        app.concierge.handle(name, session_id).await;
        app.concierge.handle(name, session_id).await;
    }

    println!("docent> {}", command);
    println!();
    let response = app.concierge.handle(command, session_id).await;
    print_response(&response);
    Ok(())
}

async fn ingest(app: &App, path: &Path) {
    let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
        println!("Not a file: {}", path.display());
        return;
    };
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            println!("Error reading {}: {}", path.display(), e);
            return;
        }
    };

    if MultimediaAgent::is_supported_format(filename) {
        println!("{}", app.media.save_upload(filename, &bytes).await.text);
        return;
    }

    let saved = app.files.save_upload(filename, &bytes).await;
    println!("{}", saved.text);
    if saved.success {
        let path = app.files.upload_dir().join(filename);
        println!("{}", app.files.ingest(&path).await.text);
    }
}

async fn run_interactive(
    app: &App,
    session_id: &str,
    settings: &ProviderSettings,
) -> anyhow::Result<()> {
    let mut session_id = session_id.to_string();

    // Show minimal startup info (only if TTY)
    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!(
            "docent ({} / {}) session: {}",
            settings.provider.name(),
            settings.models.default,
            session_id
        );
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = commands::execute_command(input, app.concierge.tasks()) {
            match result {
                commands::CommandResult::Clear => {
                    app.concierge.conversations().delete(&session_id);
                    session_id = new_session_id();
                    println!("Started a new conversation ({}).", session_id);
                }
                commands::CommandResult::Stats => {
                    println!("{}", app.concierge.system_stats().await);
                }
                commands::CommandResult::Ingest(path) => {
                    ingest(app, &path).await;
                }
                commands::CommandResult::Message(msg) => {
                    println!("{}", msg);
                }
                commands::CommandResult::Exit => {
                    break;
                }
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            println!();
            continue;
        }

        println!();
        let response = app.concierge.handle(input, &session_id).await;
        print_response(&response);
        println!();
    }

    Ok(())
}
