//! Council CLI
//!
//! Runs deliberation turns against an OpenRouter roster and serializes the
//! event stream. stdout carries answers (or JSON-line events with
//! `--events`); all logging goes to stderr.
//!
//! # Usage
//!
//! ```bash
//! # One-shot question against the default roster
//! OPENROUTER_API_KEY=... council ask "Why is the sky dark at night?"
//!
//! # Raw event feed for another process to consume
//! council ask --events "Compare Raft and Paxos" > events.jsonl
//!
//! # Interactive multi-turn session
//! council chat
//!
//! # Roster preflight against the gateway catalog
//! council models --check
//! ```

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use council::context::{AttachmentSource, FileAttachments};
use council::providers::missing_models;
use council::store::{ConversationStore, MemoryStore, TurnRecord};
use council::{
    CouncilConfig, CouncilPipeline, EventBus, EventPayload, Invoker, OpenRouterClient,
    ProviderRegistry, TurnOutcome, TurnRequest,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML roster file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one deliberation turn and print the synthesized answer
    Ask {
        /// The question to deliberate
        question: String,

        /// Print the raw event stream as JSON lines instead of rendered text
        #[arg(long)]
        events: bool,

        /// Attach a file (repeatable); images travel as data URLs
        #[arg(long)]
        attach: Vec<PathBuf>,

        /// Skip the web-search stage for this turn
        #[arg(long)]
        no_search: bool,

        /// Always request clarification before deliberating
        #[arg(long)]
        force_clarification: bool,
    },

    /// Interactive multi-turn session against an in-memory conversation
    Chat {
        /// Print the raw event stream as JSON lines instead of rendered text
        #[arg(long)]
        events: bool,
    },

    /// List the models the gateway serves
    Models {
        /// Report configured roster entries the catalog does not contain
        #[arg(long)]
        check: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("council=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = CouncilConfig::load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Ask {
            question,
            events,
            attach,
            no_search,
            force_clarification,
        } => run_ask(config, question, attach, events, no_search, force_clarification).await,
        Command::Chat { events } => run_chat(config, events).await,
        Command::Models { check } => run_models(config, check).await,
    }
}

fn build_pipeline(config: &CouncilConfig) -> Result<CouncilPipeline> {
    let client = OpenRouterClient::from_env().context("configuring the OpenRouter gateway")?;
    let mut registry = ProviderRegistry::new();
    for model in config.all_models() {
        registry.register(Arc::new(client.backend(model)));
    }
    let invoker = Invoker::new(registry).with_timeouts(
        config.council_timeout(),
        config.utility_timeout(),
        config.search_timeout(),
    );
    Ok(CouncilPipeline::new(config.clone(), invoker, EventBus::new()))
}

/// Consume the event feed until the bus closes. Raw mode prints every event
/// as one JSON line; rendered mode streams the synthesis as it arrives and
/// prints clarification questions.
fn spawn_event_printer(bus: &EventBus, raw: bool) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) if raw => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => tracing::warn!(error = %err, "unserializable event"),
                },
                Ok(event) => render_event(event.payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn render_event(payload: EventPayload) {
    match payload {
        EventPayload::Stage3Update { delta } => {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        EventPayload::Stage3Complete { .. } => println!(),
        EventPayload::ClarificationNeeded { request } => {
            println!("{}", request.reasoning);
            for (index, question) in request.questions.iter().enumerate() {
                if question.options.is_empty() {
                    println!("{}. {}", index + 1, question.text);
                } else {
                    println!(
                        "{}. {} ({})",
                        index + 1,
                        question.text,
                        question.options.join(" / ")
                    );
                }
            }
        }
        EventPayload::TitleComplete { title } => {
            tracing::info!(title = %title, "conversation titled");
        }
        _ => {}
    }
}

async fn resolve_attachments(paths: &[PathBuf]) -> Result<Vec<council::Attachment>> {
    let source = FileAttachments;
    let mut attachments = Vec::with_capacity(paths.len());
    for path in paths {
        let reference = path
            .to_str()
            .with_context(|| format!("attachment path {} is not utf-8", path.display()))?;
        attachments.push(source.resolve(reference).await?);
    }
    Ok(attachments)
}

async fn run_ask(
    config: CouncilConfig,
    question: String,
    attach: Vec<PathBuf>,
    events: bool,
    no_search: bool,
    force_clarification: bool,
) -> Result<()> {
    let pipeline = build_pipeline(&config)?;
    let printer = spawn_event_printer(pipeline.events(), events);

    let mut request = TurnRequest::new(question)
        .with_attachments(resolve_attachments(&attach).await?)
        .with_title_generation();
    if no_search {
        request = request.without_search();
    }
    if force_clarification {
        request = request.with_forced_clarification();
    }

    let result = pipeline.run(request).await;
    drop(pipeline);
    let _ = printer.await;
    result.map(|_| ()).map_err(Into::into)
}

async fn run_chat(config: CouncilConfig, events: bool) -> Result<()> {
    let pipeline = build_pipeline(&config)?;
    let printer = spawn_event_printer(pipeline.events(), events);
    let store = MemoryStore::new();
    let conversation = store.create().await?;

    eprintln!("council chat (empty line or ctrl-d to quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut first_turn = true;
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            break;
        }

        let mut request = TurnRequest::new(question)
            .with_history(store.history(conversation.id).await?);
        if first_turn {
            request = request.with_title_generation();
        }

        match pipeline.run(request).await {
            Ok(report) => {
                if let Some(title) = &report.title {
                    store.set_title(conversation.id, title).await?;
                }
                let awaiting =
                    matches!(report.outcome, TurnOutcome::AwaitingClarification { .. });
                store
                    .append_turn(
                        conversation.id,
                        TurnRecord {
                            turn_id: report.turn_id,
                            question: question.to_string(),
                            completed_at: council::types::now(),
                            outcome: report.outcome,
                        },
                    )
                    .await?;
                first_turn = false;
                if awaiting {
                    eprintln!("(answer the questions above to continue)");
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "turn failed");
            }
        }
    }

    drop(pipeline);
    let _ = printer.await;
    Ok(())
}

async fn run_models(config: CouncilConfig, check: bool) -> Result<()> {
    let client = OpenRouterClient::from_env().context("configuring the OpenRouter gateway")?;
    let catalog = client.list_models().await.context("listing models")?;

    if check {
        let roster = config.all_models();
        let missing = missing_models(&roster, &catalog);
        if missing.is_empty() {
            println!("all {} configured models are served", roster.len());
            return Ok(());
        }
        for model in &missing {
            println!("missing: {model}");
        }
        anyhow::bail!("{} configured model(s) not served by the gateway", missing.len());
    }

    for model in &catalog {
        println!("{model}");
    }
    Ok(())
}
