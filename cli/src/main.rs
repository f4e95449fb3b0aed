//! CLI entrypoint for duet
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

mod commands;
mod console;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use commands::{Cli, Command};
use console::ConsoleProgress;
use duet_application::{
    EventSink, NoEventSink, NoProgress, ProgressNotifier, RunSessionError, RunSessionInput,
    RunSessionOutput, RunSessionUseCase, SessionStore,
};
use duet_domain::{SessionId, SessionStatus};
use duet_infrastructure::{
    ConfigLoader, FileConfig, HandleRegistry, HttpEventSink, JsonlSessionStore, ProcessSupervisor,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level
    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    };

    // Diagnostic logs go to stderr (or a file); the session transcript
    // is the store's concern, not the logger's.
    let _log_guard = match &cli.log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file = path
                .file_name()
                .ok_or_else(|| anyhow!("--log-file must name a file"))?;
            let appender = tracing_appender::rolling::never(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
            None
        }
    };

    if matches!(cli.command, Command::ConfigSources) {
        ConfigLoader::print_config_sources();
        return Ok(());
    }

    let config = if cli.no_config {
        ConfigLoader::load_defaults()
    } else {
        ConfigLoader::load(cli.config.as_ref()).map_err(|e| anyhow!(e))?
    };
    config.validate()?;

    let store: Arc<dyn SessionStore> = Arc::new(
        JsonlSessionStore::new(&config.store.sessions_dir)
            .with_context(|| format!("opening sessions dir {}", config.store.sessions_dir))?,
    );

    match cli.command {
        Command::Run {
            task,
            working_dir,
            max_iterations,
        } => {
            let mut params = config.execution_params(working_dir.clone());
            if let Some(max) = max_iterations {
                params = params.with_max_iterations(max);
            }

            let wired = wire(cli.quiet, &config, Arc::clone(&store), working_dir);
            let result = wired
                .use_case
                .execute_with_progress(RunSessionInput::new(task, params), wired.progress.as_ref())
                .await;
            wired.supervisor.shutdown().await;
            report_outcome(finish(result)?)
        }
        Command::Resume { session_id } => {
            let params = config.execution_params(None);
            let id = SessionId::from(session_id);

            let wired = wire(cli.quiet, &config, Arc::clone(&store), None);
            let result = wired
                .use_case
                .resume_with_progress(&id, params, wired.progress.as_ref())
                .await;
            wired.supervisor.shutdown().await;
            report_outcome(finish(result)?)
        }
        Command::Show { session_id } => {
            let session = store.load(&SessionId::from(session_id)).await?;
            println!("{}", console::render_session(&session));
            Ok(())
        }
        Command::List => {
            for id in store.list().await? {
                println!("{id}");
            }
            Ok(())
        }
        Command::ConfigSources => unreachable!("handled before config load"),
    }
}

struct Wired {
    use_case: RunSessionUseCase<ProcessSupervisor>,
    supervisor: Arc<ProcessSupervisor>,
    progress: Arc<dyn ProgressNotifier>,
}

/// Wire the supervisor, store, and sink into a use case.
fn wire(
    quiet: bool,
    config: &FileConfig,
    store: Arc<dyn SessionStore>,
    working_dir: Option<String>,
) -> Wired {
    // === Dependency Injection ===
    let registry = HandleRegistry::new();
    let supervisor = Arc::new(ProcessSupervisor::new(
        config.agent_process_config(working_dir),
        config.supervisor_config(),
        registry,
    ));

    let sink: Arc<dyn EventSink> = match &config.sink.endpoint {
        Some(endpoint) => Arc::new(HttpEventSink::new(endpoint.clone())),
        None => Arc::new(NoEventSink),
    };

    // Ctrl-C cancels cooperatively between turns and terminates the
    // child mid-turn.
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling session...");
                token.cancel();
            }
        });
    }

    let use_case = RunSessionUseCase::new(Arc::clone(&supervisor), store)
        .with_sink(sink)
        .with_cancellation(token);

    let progress: Arc<dyn ProgressNotifier> = if quiet {
        Arc::new(NoProgress)
    } else {
        Arc::new(ConsoleProgress::new())
    };

    Wired {
        use_case,
        supervisor,
        progress,
    }
}

fn finish(result: Result<RunSessionOutput, RunSessionError>) -> Result<RunSessionOutput> {
    match result {
        Ok(output) => Ok(output),
        Err(e) if e.is_cancelled() => {
            info!("Session cancelled by user");
            Err(anyhow!("cancelled"))
        }
        Err(e) => Err(e.into()),
    }
}

fn report_outcome(output: RunSessionOutput) -> Result<()> {
    match output.session.status {
        SessionStatus::Completed => Ok(()),
        SessionStatus::Paused => {
            eprintln!(
                "Session {} is paused; resolve the escalation and `duet resume {}`",
                output.session.id, output.session.id
            );
            std::process::exit(2);
        }
        status => Err(anyhow!(
            "session ended in status {status}: {}",
            output.summary
        )),
    }
}
