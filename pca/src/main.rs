// pca/src/main.rs
use std::fs;
use std::process;

use clap::Parser;
use colored::Colorize;
use pca_common::config::{default_config_path, Settings};
use pca_common::error::PcaError;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod cli;
mod daemon;
mod rpc;
mod ui;

use cli::{CliArgs, Command};

pub(crate) const FAILURE_EXIT_CODE: i32 = 1;
pub(crate) const FATAL_EXIT_CODE: i32 = 3;

fn exit_code(err: &PcaError) -> i32 {
    if err.is_fatal() {
        FATAL_EXIT_CODE
    } else {
        FAILURE_EXIT_CODE
    }
}

fn init_tracing(verbose: u8, settings: &Settings, to_file: bool) {
    let level_filter = match (verbose, settings.debug) {
        (0, false) => LevelFilter::INFO,
        (0, true) | (1, _) => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::INFO);

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("PCA_LOG")
        .from_env_lossy();

    let log_dir = &settings.log_dir;
    if !to_file {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
    } else if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!(
            "{} Failed to create log directory {}: {} (try with admin permissions)",
            "Error:".red().bold(),
            log_dir.display(),
            e
        );
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
    } else {
        let file_appender = tracing_appender::rolling::daily(log_dir, "pca.log");
        let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

        let stderr_writer = std::io::stderr.with_max_level(max_log_level);
        let file_writer = non_blocking_appender.with_max_level(max_log_level);

        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(stderr_writer.and(file_writer))
            .with_ansi(true)
            .try_init();

        // The writer must outlive every log call.
        Box::leak(Box::new(guard));

        debug!("Writing logs to {}", log_dir.join("pca.log").display());
    }
}

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::parse();

    if let Command::Version = cli_args.command {
        println!("pca {}", pca_core::AGENT_VERSION);
        return;
    }

    let config_path = default_config_path();
    let settings = match Settings::load_from(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!(
                "{}: Could not load {}: {}",
                "Error".red().bold(),
                config_path.display(),
                e
            );
            process::exit(FAILURE_EXIT_CODE);
        }
    };

    let daemon_mode = matches!(cli_args.command, Command::Service(_));
    init_tracing(cli_args.verbose, &settings, daemon_mode || cli_args.verbose > 0);

    if let Err(e) = cli::run(cli_args, config_path, settings).await {
        error!("Command failed: {:#}", e);
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        process::exit(exit_code(&e));
    }
    debug!("Command completed successfully.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_archives_exit_with_three() {
        assert_eq!(
            exit_code(&PcaError::UnsupportedArchiveType("x-tar".into())),
            FATAL_EXIT_CODE
        );
        assert_eq!(
            exit_code(&PcaError::ServiceBusy("pca install (pid 1)".into())),
            FAILURE_EXIT_CODE
        );
    }
}
