//! rps CLI: play rock-paper-scissors against a game server.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rps_session::{Config, PlayOutcome, SessionController, SessionHandle, SessionState};
use rps_types::Choice;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(
    name = "rps",
    about = "Play rock-paper-scissors against a game server",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Server endpoint, overriding the configured one (ws://host:port).
    #[arg(short, long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play one turn per choice, in order.
    Play {
        /// rock, paper or scissors (or r, p, s).
        #[arg(required = true)]
        choices: Vec<Choice>,
    },

    /// Read choices from stdin, one per line.
    Interactive,

    /// Print the default configuration.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::DefaultConfig = cli.command {
        print!("{}", toml::to_string_pretty(&Config::default())?);
        return Ok(());
    }

    let mut config = rps_session::load_config(cli.config.as_deref())?;
    if let Some(endpoint) = cli.endpoint {
        config.client.endpoint = endpoint;
        config.validate()?;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.client.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(endpoint = %config.client.endpoint, "starting rps client");
    let (handle, task) = SessionController::spawn(&config);

    let result = match cli.command {
        Commands::Play { choices } => play_all(&handle, &choices).await,
        Commands::Interactive => interactive(&handle).await,
        Commands::DefaultConfig => Ok(()),
    };

    handle.disconnect().await;
    handle.shutdown().await;
    task.await.context("session controller panicked")?;
    result
}

async fn play_all(handle: &SessionHandle, choices: &[Choice]) -> anyhow::Result<()> {
    for &choice in choices {
        let state = play_turn(handle, choice).await?;
        report(choice, &state);
    }
    Ok(())
}

async fn interactive(handle: &SessionHandle) -> anyhow::Result<()> {
    println!("Choose rock, paper or scissors (r/p/s). 'quit' to leave.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "q" | "exit" => break,
            "disconnect" => {
                handle.disconnect().await;
                println!("disconnected");
                continue;
            }
            _ => {}
        }

        let choice: Choice = match line.parse() {
            Ok(choice) => choice,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match play_turn(handle, choice).await {
            Ok(state) => report(choice, &state),
            Err(e) => println!("{e:#}"),
        }
    }
    Ok(())
}

/// Play one turn and wait for it to resolve.
async fn play_turn(handle: &SessionHandle, choice: Choice) -> anyhow::Result<SessionState> {
    match handle.play(choice).await {
        PlayOutcome::Sent(turn) => Ok(handle.wait_turn(turn).await),
        PlayOutcome::Failed => match handle.state().last_error {
            Some(failure) => bail!("{failure}"),
            None => bail!("turn could not be sent"),
        },
        PlayOutcome::Busy => bail!("a turn is already outstanding"),
        PlayOutcome::Cancelled => bail!("connection attempt cancelled"),
        PlayOutcome::Stopped => bail!("session has stopped"),
    }
}

fn report(choice: Choice, state: &SessionState) {
    match (&state.last_result, &state.last_error) {
        (Some(result), _) => println!("{choice}: {result} Score: {}", state.score),
        (None, Some(failure)) => println!("{choice}: {failure}"),
        (None, None) => println!("{choice}: no result"),
    }
}
