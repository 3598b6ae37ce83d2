use color_eyre::{eyre::eyre, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use trafficlight_remote::config::ClientConfig;
use trafficlight_remote::runtime::{ClientRuntime, Running};
use trafficlight_remote::{Command, ConnectionPhase, Snapshot};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = ClientConfig::resolve_path(std::env::args().nth(1))?;
    info!("Using configuration {}", path.display());
    let config = ClientConfig::load_or_create(&path).await?;

    let runtime = ClientRuntime::create(config)
        .start()
        .map_err(|e| eyre!("Failed to start client: {}", e))?;

    let result = run_terminal(&runtime).await;

    let stopped = runtime.shutdown().await;
    println!("{}", render(&stopped.snapshot()));
    result
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Line-oriented front-end: prints every snapshot change and accepts
/// `on`, `off`, `status` and `quit` on stdin.
async fn run_terminal(runtime: &ClientRuntime<Running>) -> Result<()> {
    let mut snapshots = runtime.watch();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", render(&snapshots.borrow_and_update()));
    println!("commands: on | off | status | quit");

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    warn!("Client stopped on its own");
                    return Ok(());
                }
                println!("{}", render(&snapshots.borrow_and_update()));
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                match line.trim().to_ascii_lowercase().as_str() {
                    "" => {}
                    "quit" | "exit" => return Ok(()),
                    "status" => println!("{}", render(&runtime.snapshot())),
                    other => match other.parse::<Command>() {
                        Ok(command) => match runtime.send_command(command).await {
                            Ok(()) => println!("{} sent", command),
                            Err(e) => println!("{} not sent: {}", command, e),
                        },
                        Err(e) => println!("{}", e),
                    },
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for ctrl-c: {}", e);
                }
                return Ok(());
            }
        }
    }
}

fn render(snapshot: &Snapshot) -> String {
    let badge = match snapshot.phase {
        ConnectionPhase::Connected => "●",
        ConnectionPhase::Disconnected => "○",
        ConnectionPhase::Error => "✖",
        _ => "◌",
    };
    format!("{} {}", badge, snapshot)
}
