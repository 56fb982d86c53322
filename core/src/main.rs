//! Merge Gate CLI
//!
//! Evaluates the given PRs one after another while serving gate status.

use std::path::PathBuf;
use std::sync::Arc;

use merge_gate::retry::SystemClock;
use merge_gate::{
    EvaluationOutcome, GateConfig, GateCoordinator, GhCliClient, JenkinsClient, StatusPublisher,
    Validate,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <config.toml|config.yaml> <pr-number>...", args[0]);
        eprintln!("\nWaits for stable builds, validates and merges each PR in order.");
        eprintln!("Gate status is served as JSON on the configured status_addr.");
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);
    let mut numbers = Vec::new();
    for arg in &args[2..] {
        match arg.parse::<u64>() {
            Ok(number) => numbers.push(number),
            Err(_) => {
                eprintln!("Invalid PR number: {}", arg);
                std::process::exit(1);
            }
        }
    }

    let config = match GateConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    match config.validate().into_result() {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!(warning = %warning, "config warning");
            }
        }
        Err(e) => {
            eprintln!("Invalid config: {}", e);
            std::process::exit(1);
        }
    }

    let checker = match JenkinsClient::new(&config.jenkins_host) {
        Ok(checker) => checker,
        Err(e) => {
            eprintln!("Failed to create Jenkins client: {}", e);
            std::process::exit(1);
        }
    };
    let vcs = GhCliClient::new(&config.repo, config.validation_policy(), Arc::new(SystemClock));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let gate = GateCoordinator::new(&config, checker, vcs);
    let publisher = StatusPublisher::new(gate.state());
    let server = tokio::spawn(publisher.serve(config.status_addr, cancel.clone()));

    let mut failed = false;
    for number in numbers {
        if cancel.is_cancelled() {
            break;
        }

        let candidate = match gate.vcs().fetch_candidate(number, &cancel).await {
            Ok(candidate) => candidate,
            Err(e) => {
                eprintln!("Failed to load PR {}: {}", number, e);
                gate.record_message(&format!("Failed to load PR {}: {}", number, e));
                gate.record_error(&e);
                failed = true;
                continue;
            }
        };

        match gate.evaluate(candidate, &cancel).await {
            Ok(EvaluationOutcome::Merged { bypassed }) => {
                println!("PR {}: merged{}", number, if bypassed { " (bypassed)" } else { "" });
            }
            Ok(EvaluationOutcome::Rejected) => {
                println!("PR {}: rejected", number);
            }
            Err(e) => {
                eprintln!("PR {}: {}", number, e);
                failed = true;
            }
        }
    }

    cancel.cancel();
    match server.await {
        Ok(Err(e)) => tracing::error!(error = %e, "status server failed"),
        Err(e) => tracing::error!(error = %e, "status server task panicked"),
        Ok(Ok(())) => {}
    }

    if failed {
        std::process::exit(1);
    }
}
