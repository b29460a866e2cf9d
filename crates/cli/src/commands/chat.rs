//! `cerebro` — interactive or single-message chat.

use cerebro_agent::{AgentLoop, EventStreamer, NO_RESPONSE, RunOutcome, StreamEvent, ThreadRunner};
use cerebro_checkpoint::ThreadIdentity;
use cerebro_config::{AppConfig, ConfigOverrides};
use cerebro_core::error::{Error, ProviderError};
use cerebro_core::event::{DomainEvent, EventBus};
use chrono::Utc;
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::warn;

pub struct ChatOptions {
    pub message: Option<String>,
    pub new_thread: bool,
    pub thread: Option<String>,
    pub overrides: ConfigOverrides,
}

pub async fn run(options: ChatOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(&options.overrides)
        .map_err(|e| format!("Failed to load config: {e}"))?;

    let provider = match cerebro_providers::build_from_config(&config) {
        Ok(provider) => provider,
        Err(e @ ProviderError::NotConfigured(_)) => {
            print_key_help();
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let event_bus = Arc::new(EventBus::default());
    let mut notices = event_bus.subscribe();

    let resolution = cerebro_tools::resolver_from_config(&config, Some(Arc::clone(&event_bus)))
        .resolve()
        .await;
    print_notices(&mut notices);

    let store = cerebro_checkpoint::open_store(&config).await?;
    let identity = ThreadIdentity::in_data_dir(&config.data_dir());

    let tool_names = resolution.registry.names().join(", ");
    let agent = AgentLoop::from_config(&config, provider, resolution.registry, store)
        .with_event_bus(Arc::clone(&event_bus));
    let runner = ThreadRunner::new(Arc::new(agent));

    let mut thread_id = match (&options.thread, options.new_thread) {
        (Some(thread), _) => thread.clone(),
        (None, true) => identity.new_thread_id(Utc::now()).await?,
        (None, false) => identity.resolve_thread_id(Utc::now()).await,
    };

    if let Some(message) = options.message {
        let mut renderer = Renderer::new(std::io::stdout());
        let result = send(&runner, &identity, &thread_id, &message, &mut renderer).await;
        print_notices(&mut notices);
        result?;
        return Ok(());
    }

    println!();
    println!("  Cerebro");
    println!();
    println!("  Model:   {}", config.model);
    println!("  Tools:   {tool_names}");
    println!("  Thread:  {thread_id}");
    println!();
    println!("  Type your message and press Enter. /new starts a new thread, /exit quits.");
    println!("  Ctrl+C cancels a running reply.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/new" => {
                thread_id = identity.new_thread_id(Utc::now()).await?;
                println!("  Started new thread {thread_id}");
                continue;
            }
            _ => {}
        }

        println!();
        let mut renderer = Renderer::new(std::io::stdout());
        if let Err(e) = send(&runner, &identity, &thread_id, line, &mut renderer).await {
            // Provider failures were already rendered inline.
            if !matches!(e, Error::Provider(_) | Error::Cancelled) {
                eprintln!("  [Error] {e}");
            }
        }
        print_notices(&mut notices);
        println!();
    }

    runner.shutdown().await;
    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Run one message to completion, rendering events as they arrive.
/// Ctrl+C cancels the run.
async fn send<W: Write>(
    runner: &ThreadRunner,
    identity: &ThreadIdentity,
    thread_id: &str,
    text: &str,
    renderer: &mut Renderer<W>,
) -> Result<RunOutcome, Error> {
    let mut handle = runner.submit(thread_id, text).await;
    loop {
        tokio::select! {
            event = handle.events.next() => match event {
                Some(event) => {
                    if let Err(e) = renderer.render(&event) {
                        warn!(error = %e, "Failed to write output");
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                let _ = renderer.line("(cancelled)");
                break;
            }
        }
    }
    let result = handle.join().await;

    // Remember the thread whatever the outcome, so the next start resumes it.
    if let Err(e) = identity.remember(thread_id).await {
        warn!(thread_id, error = %e, "Could not record last thread");
    }
    result
}

/// Prints a run's events as a chat transcript.
pub struct Renderer<W> {
    out: W,
    streamer: EventStreamer,
    at_line_start: bool,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            streamer: EventStreamer::new(),
            at_line_start: true,
        }
    }

    pub fn render(&mut self, event: &StreamEvent) -> std::io::Result<()> {
        let tools_before = self.streamer.view().tools().len();
        let view = self.streamer.apply(event).clone();

        match event {
            StreamEvent::TokenDelta { text } => {
                write!(self.out, "{text}")?;
                self.at_line_start = text.ends_with('\n');
            }
            StreamEvent::ToolStarted { name } if view.tools().len() > tools_before => {
                self.line(&format!("  ↳ {name}"))?;
            }
            StreamEvent::ToolStarted { .. } | StreamEvent::ToolFinished { .. } => {}
            StreamEvent::Error { detail } => {
                self.line(&format!("[error] {detail}"))?;
            }
            StreamEvent::Done { final_text } => {
                if final_text.is_empty() && view.text().is_empty() {
                    self.line(NO_RESPONSE)?;
                } else if !self.at_line_start {
                    writeln!(self.out)?;
                    self.at_line_start = true;
                }
            }
        }
        self.out.flush()
    }

    /// Write `text` on its own line.
    pub fn line(&mut self, text: &str) -> std::io::Result<()> {
        if !self.at_line_start {
            writeln!(self.out)?;
        }
        writeln!(self.out, "{text}")?;
        self.at_line_start = true;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn print_notices(notices: &mut broadcast::Receiver<Arc<DomainEvent>>) {
    while let Ok(event) = notices.try_recv() {
        match event.as_ref() {
            DomainEvent::RemoteToolsConnected { provider, count, .. } => {
                eprintln!("  {provider} connected ({count} tools)");
            }
            DomainEvent::RemoteToolsUnavailable { provider, reason, .. } => {
                eprintln!("  {provider} unavailable: {reason}. Running without its tools");
            }
            DomainEvent::ErrorOccurred {
                context, error_message, ..
            } if context == "checkpoint save" => {
                eprintln!("  Warning: history not saved ({error_message})");
            }
            _ => {}
        }
    }
}

fn print_key_help() {
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    export OPENROUTER_API_KEY='sk-or-v1-...'   (recommended)");
    eprintln!("    export OPENAI_API_KEY='sk-...'             (OpenAI, with the next line)");
    eprintln!("    export CEREBRO_BASE_URL='https://api.openai.com/v1'");
    eprintln!("    export CEREBRO_API_KEY='sk-...'            (generic)");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_path().display());
    eprintln!();
}
