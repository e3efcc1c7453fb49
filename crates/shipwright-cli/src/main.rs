//! shipwright - chat client for the release automation assistant

mod commands;
mod config;
mod render;
mod utils;

use std::io::{self, Write};
use std::sync::Arc;

use clap::Parser;
use shipwright_api::{ApprovalDecision, HttpClient, ReleaseType, repositories};
use shipwright_chat::{ChatEvent, CycleOutcome, Reconciler, ReleaseForm, Role, SubmitRequest};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use commands::CommandResult;
use render::StreamPrinter;

/// shipwright - talk to the release bot from your terminal
#[derive(Parser, Debug)]
#[command(name = "shipwright")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend base URL (default: http://localhost:8000)
    #[arg(long)]
    base_url: Option<String>,

    /// Repository to include in the release form (repeatable)
    #[arg(long = "repo")]
    repos: Vec<String>,

    /// Release type (release, hotfix)
    #[arg(long)]
    release_type: Option<ReleaseType>,

    /// Sprint name
    #[arg(long)]
    sprint: Option<String>,

    /// Fix version
    #[arg(long)]
    fix_version: Option<String>,

    /// Send a single message, print the answer and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// List repositories known to the backend
    #[arg(long)]
    list_repos: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("shipwright=debug")
            .with_writer(io::stderr)
            .init();
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }

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
    let client = HttpClient::new(cfg.endpoints(args.base_url.clone()))?;
    tracing::debug!("Using backend {}", client.endpoints().base_url);

    if args.list_repos {
        return list_repos(&client).await;
    }

    // Merge config with CLI args (CLI takes precedence)
    let names = if args.repos.is_empty() {
        cfg.release.repositories.clone()
    } else {
        args.repos.clone()
    };
    let form = ReleaseForm {
        repositories: resolve_names(&client, &names).await?,
        release_type: args.release_type.or(cfg.release.release_type),
        sprint_name: args.sprint.or(cfg.release.sprint_name.clone()),
        fix_version: args.fix_version.or(cfg.release.fix_version.clone()),
    };

    let reconciler = Reconciler::spawn(Arc::new(client.clone()), cfg.reconciler());
    tracing::debug!("Session {}", reconciler.session_id());

    // Non-interactive mode
    if let Some(command) = args.command {
        return run_command(&reconciler, &command, form).await;
    }

    run_interactive(&reconciler, &client, form).await
}

/// Resolve repository names against the directory.
///
/// Unknown names are an error; an unreachable directory is not, the names
/// are then sent as given.
async fn resolve_names(client: &HttpClient, names: &[String]) -> anyhow::Result<Vec<String>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }

    match client.list_repositories().await {
        Ok(directory) => Ok(repositories::resolve_repositories(&directory, names)?),
        Err(e) => {
            tracing::warn!("Repository directory unavailable: {}", e);
            eprintln!("Warning: could not load repository directory ({}); using names as given", e);
            Ok(names.to_vec())
        }
    }
}

async fn list_repos(client: &HttpClient) -> anyhow::Result<()> {
    let directory = client.list_repositories().await?;
    if directory.is_empty() {
        println!("No repositories configured.");
        return Ok(());
    }

    let width = directory.iter().map(|r| r.id.len()).max().unwrap_or(0);
    for repo in &directory {
        println!("  {:<width$}  {}  {}", repo.id, repo.name, repo.url, width = width);
    }
    Ok(())
}

async fn run_command(reconciler: &Reconciler, command: &str, form: ReleaseForm) -> anyhow::Result<()> {
    println!("shipwright> {}", command);
    println!();

    let mut events = reconciler.subscribe();
    let Some(handle) = reconciler
        .submit(SubmitRequest::new(command).with_form(form))
        .await?
    else {
        anyhow::bail!("Nothing to send");
    };

    let mut printer = StreamPrinter::new();
    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ChatEvent::MessageUpdated { message }) => {
                    if let Some(text) = printer.render(&message) {
                        print!("{}", text);
                        io::stdout().flush().ok();
                    }
                }
                Ok(ChatEvent::WorkflowStarted { workflow_id, .. }) => {
                    tracing::info!("Workflow {} started", workflow_id);
                }
                Ok(ChatEvent::CycleEnded { message_id, outcome }) if message_id == handle.message_id() => {
                    break outcome;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Dropped {} events", n);
                }
                Err(RecvError::Closed) => break handle.join().await?,
            },
            _ = tokio::signal::ctrl_c() => {
                // A second Ctrl-C gives up on the reconciler winding down
                if handle.is_cancelled() {
                    anyhow::bail!("Interrupted");
                }
                handle.cancel();
            }
        }
    };
    println!();

    print_outcome(&outcome);
    if outcome.is_error() {
        anyhow::bail!(outcome.error_message().unwrap_or_else(|| format!("{:?}", outcome)));
    }
    Ok(())
}

async fn run_interactive(
    reconciler: &Reconciler,
    client: &HttpClient,
    mut form: ReleaseForm,
) -> anyhow::Result<()> {
    if std::io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!(
            "shipwright ({}) session: {}",
            client.endpoints().base_url,
            &reconciler.session_id()[..8.min(reconciler.session_id().len())]
        );
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut events = reconciler.subscribe();
    let mut printer = StreamPrinter::new();
    let mut last_workflow: Option<String> = None;

    prompt()?;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                // EOF
                let Some(line) = line? else { break };
                let input = line.trim();
                if input.is_empty() {
                    prompt()?;
                    continue;
                }

                if let Some(result) = commands::execute_command(input, &mut form) {
                    match result {
                        CommandResult::Exit => break,
                        CommandResult::Clear => {
                            reconciler.clear();
                            printer.reset();
                            println!("Cleared conversation.");
                        }
                        CommandResult::Message(msg) => println!("{}", msg),
                        CommandResult::Unknown(cmd) => {
                            println!("Unknown command: /{}", cmd);
                            println!("Type /help for available commands.");
                        }
                        CommandResult::ListRepos => {
                            if let Err(e) = list_repos(client).await {
                                println!("Failed to list repositories: {}", e);
                            }
                        }
                        CommandResult::SetRepositories(names) => {
                            match resolve_names(client, &names).await {
                                Ok(ids) => {
                                    println!("Repositories set to: {}", ids.join(", "));
                                    form.repositories = ids;
                                }
                                Err(e) => println!("{}", e),
                            }
                        }
                        CommandResult::ApprovalStatus => {
                            show_approval(client, last_workflow.as_deref()).await;
                        }
                        CommandResult::Decide { approved, comment } => {
                            decide(client, last_workflow.as_deref(), ApprovalDecision { approved, comment }).await;
                        }
                        CommandResult::History => {
                            print_history(reconciler).await?;
                        }
                    }
                    println!();
                    prompt()?;
                    continue;
                }

                let request = SubmitRequest::new(input).with_form(form.clone());
                if reconciler.submit(request).await?.is_none() {
                    println!("Still waiting on the previous response (Ctrl-C to stop it).");
                } else {
                    println!();
                }
            }

            event = events.recv() => match event {
                Ok(event) => {
                    if handle_event(event, &mut printer, &mut last_workflow) {
                        prompt()?;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Dropped {} events", n);
                }
                Err(RecvError::Closed) => break,
            },

            _ = tokio::signal::ctrl_c() => {
                if reconciler.is_busy().await? {
                    reconciler.cancel();
                } else {
                    println!();
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Print an event; returns true when the prompt should be shown again.
fn handle_event(
    event: ChatEvent,
    printer: &mut StreamPrinter,
    last_workflow: &mut Option<String>,
) -> bool {
    let terminal = event.is_terminal();
    match event {
        ChatEvent::MessageUpdated { message } => {
            if let Some(text) = printer.render(&message) {
                print!("{}", text);
                io::stdout().flush().ok();
            }
        }
        ChatEvent::WorkflowStarted { workflow_id, .. } => {
            tracing::info!("Workflow {} started", workflow_id);
            *last_workflow = Some(workflow_id);
        }
        ChatEvent::CycleEnded { message_id, outcome } => {
            printer.finish(message_id);
            println!();
            print_outcome(&outcome);
            println!();
        }
        ChatEvent::Error { message } => eprintln!("Error: {}", message),
        ChatEvent::Cleared => printer.reset(),
        ChatEvent::MessageAdded { .. } => {}
    }
    terminal
}

fn print_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Failed { workflow_id } => println!("[Workflow {} failed]", workflow_id),
        CycleOutcome::Cancelled => println!("[Stopped waiting for a response]"),
        _ => {}
    }
}

async fn show_approval(client: &HttpClient, workflow_id: Option<&str>) {
    let Some(workflow_id) = workflow_id else {
        println!("No workflow started in this session yet.");
        return;
    };

    match client.approval_status(workflow_id).await {
        Ok(status) if status.pending => {
            println!("Workflow {} is waiting for approval.", workflow_id);
            if let Some(prompt) = status.prompt {
                println!("  {}", prompt);
            }
            println!("Answer with /approve [comment] or /reject [comment].");
        }
        Ok(_) => println!("Workflow {} has no pending approval.", workflow_id),
        Err(e) if e.is_not_found() => println!("Workflow {} has no pending approval.", workflow_id),
        Err(e) => println!("Failed to get approval status: {}", e),
    }
}

async fn decide(client: &HttpClient, workflow_id: Option<&str>, decision: ApprovalDecision) {
    let Some(workflow_id) = workflow_id else {
        println!("No workflow started in this session yet.");
        return;
    };

    let verb = if decision.approved { "Approved" } else { "Rejected" };
    match client.submit_decision(workflow_id, &decision).await {
        Ok(()) => println!("{} workflow {}.", verb, workflow_id),
        Err(e) => println!("Failed to submit decision: {}", e),
    }
}

async fn print_history(reconciler: &Reconciler) -> anyhow::Result<()> {
    let messages = reconciler.messages().await?;
    if messages.is_empty() {
        println!("No messages yet.");
        return Ok(());
    }

    for (i, message) in messages.iter().enumerate() {
        let role = match message.role {
            Role::User => "you",
            Role::Assistant => "bot",
        };
        let marker = if message.streaming { " (streaming)" } else { "" };
        println!(
            "  {:>2} {} [{}]{} {}",
            i,
            message.created_at.format("%H:%M:%S"),
            role,
            marker,
            utils::preview(&message.content, 60)
        );
    }
    Ok(())
}

fn prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}
