use clap::Parser;
use colored::*;
use stdf_measure::cli::{self, Args};
use std::process;
use tokio_util::sync::CancellationToken;

fn main() {
    let args = Args::parse();
    cli::setup_logging(&args);

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        let cancellation_token = CancellationToken::new();

        // Workers stop at the next record boundary; the run then reports Cancelled
        let signal_token = cancellation_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nReceived CTRL+C, shutting down gracefully...");
                signal_token.cancel();
            }
        });

        cli::run(args, cancellation_token).await
    });

    match result {
        Ok(stats) if stats.files_failed > 0 => {
            eprintln!(
                "{} {} files failed",
                "Warning:".bright_yellow().bold(),
                stats.files_failed
            );
            process::exit(2);
        }
        Ok(_stats) => process::exit(0),
        Err(error) => {
            eprintln!("{} {:#}", "Error:".bright_red().bold(), error);
            process::exit(1);
        }
    }
}
