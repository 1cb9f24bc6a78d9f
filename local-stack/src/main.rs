use lambda_local_stack::{EmulatorEvent, Functions, Session, SessionOptions};
use std::env::args;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let functions_file = match args().nth(1) {
        Some(v) if v != "--help" => PathBuf::from(v),
        _ => {
            print_help();
            return Ok(());
        }
    };

    // artifacts are resolved against the directory of the functions file unless specified
    let base_dir = match args().nth(2) {
        Some(v) => PathBuf::from(v),
        None => functions_file
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let base_dir = if base_dir.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base_dir
    };

    let functions: Functions = serde_json::from_str(&std::fs::read_to_string(&functions_file)?)?;
    info!("{} function(s) from {}", functions.len(), functions_file.display());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = Session::generate(&base_dir, &functions, SessionOptions::from_env()?)?.with_observer(tx);

    let url = session.start().await?;
    info!("HTTP API: {url}");
    for (route, id) in session.names().iter() {
        info!("{route} -> {id}");
    }
    info!("Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping");
                break;
            }
            event = rx.recv() => match event {
                Some(EmulatorEvent::Stdout(line)) => info!("{line}"),
                Some(EmulatorEvent::Stderr(line)) => warn!("{line}"),
                Some(EmulatorEvent::Exited(code)) => {
                    error!("The emulator exited unexpectedly with {:?}", code);
                    break;
                }
                None => break,
            }
        }
    }

    session.stop().await?;

    Ok(())
}

fn print_help() {
    println!("Runs AWS Lambda functions behind a local SAM emulator.");
    println!();
    println!("Usage: lambda-local-stack <functions.json> [base_dir]");
    println!();
    println!("functions.json maps logical keys to function descriptions, e.g.");
    println!(r#"  {{ "greet": {{ "filename": "fn.zip", "handler": "index.handler", "runtime": "nodejs18.x", "route": "/hello" }} }}"#);
    println!("Archives are looked up relative to base_dir, which defaults to the directory of functions.json.");
    println!();
    println!("Env vars: LAMBDA_LOCAL_PORT, LAMBDA_LOCAL_HOST, LAMBDA_LOCAL_REGION, LAMBDA_LOCAL_EMULATOR,");
    println!("LAMBDA_LOCAL_EMULATOR_ARGS, LAMBDA_LOCAL_EXTRA_ARGS, LAMBDA_LOCAL_READY_TIMEOUT_SECS");
}

/// Initializes the tracing from RUST_LOG env var if present or sets minimal logging:
/// - INFO for this crate
/// - nothing from the dependencies
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(
                    Directive::from_str("lambda_local_stack=info").expect("Invalid logging filter. It's a bug."),
                )
                .from_env_lossy(),
        )
        .with_ansi(true)
        .with_target(false)
        .compact()
        .init();
}
