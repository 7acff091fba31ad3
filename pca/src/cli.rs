// pca/src/cli.rs
//! Defines the command-line argument structure using clap.
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use pca_common::config::Settings;
use pca_common::error::{PcaError, Result};
use pca_core::{Agent, BackendFactory, SystemBackendFactory, AGENT_VERSION};
use pca_net::{ControlPlane, RestClient};
use tracing::debug;

pub mod install;
pub mod list;
pub mod patch;
pub mod prompt;
pub mod reconf;
pub mod reg;
pub mod remove;
pub mod service;
pub mod soft;
pub mod status;
pub mod update;

use crate::cli::install::InstallArgs;
use crate::cli::list::List;
use crate::cli::patch::Patch;
use crate::cli::reconf::Reconf;
use crate::cli::reg::Reg;
use crate::cli::remove::Remove;
use crate::cli::service::Service;
use crate::cli::soft::Soft;
use crate::cli::update::UpdateArgs;
use crate::daemon::shutdown_signal;
use crate::rpc::LockSession;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "pca", bin_name = "pca")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Answer yes to every confirmation
    #[arg(short, long, global = true)]
    pub force: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the agent version
    Version,
    Reg(Reg),
    List(List),
    Install(InstallArgs),
    Remove(Remove),
    Update(UpdateArgs),
    Patch(Patch),
    Soft(Soft),
    Reconf(Reconf),
    Service(Service),
}

/// What a command runs against.
pub struct CommandContext<'a> {
    pub agent: &'a mut Agent,
    /// Skip confirmations.
    pub force: bool,
    /// A terminal is attached; remote commands run without one.
    pub interactive: bool,
    pub verbose: u8,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Reg(_) => "reg",
            Self::List(_) => "list",
            Self::Install(_) => "install",
            Self::Remove(_) => "remove",
            Self::Update(_) => "update",
            Self::Patch(_) => "patch",
            Self::Soft(_) => "soft",
            Self::Reconf(_) => "reconf",
            Self::Service(_) => "service",
        }
    }

    /// Commands that must hold the daemon's operation lock.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Reg(_)
                | Self::Install(_)
                | Self::Remove(_)
                | Self::Update(_)
                | Self::Patch(_)
                | Self::Soft(_)
        )
    }

    pub async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        match self {
            Self::Version => {
                println!("pca {AGENT_VERSION}");
                Ok(())
            }
            Self::Reg(command) => command.run(ctx).await,
            Self::List(command) => command.run(ctx).await,
            Self::Install(command) => command.run(ctx).await,
            Self::Remove(command) => command.run(ctx).await,
            Self::Update(command) => command.run(ctx).await,
            Self::Patch(command) => command.run(ctx).await,
            Self::Soft(command) => command.run(ctx).await,
            Self::Reconf(_) | Self::Service(_) => Err(PcaError::CommandExecError(format!(
                "'{}' needs the configuration file and cannot run here",
                self.name()
            ))),
        }
    }
}

pub async fn build_agent(settings: Settings) -> Result<Agent> {
    let control: Arc<dyn ControlPlane> = Arc::new(RestClient::new(&settings)?);
    let backends: Arc<dyn BackendFactory> = Arc::new(SystemBackendFactory::detect(&settings));
    Agent::new(settings, control, backends).await
}

/// Takes the daemon lock for mutating commands, then loads the agent so the
/// ledger it reads is the one left by the previous lock holder.
async fn open_session(
    command: &Command,
    settings: &Settings,
) -> Result<(Option<LockSession>, Agent)> {
    let session = if command.is_mutating() {
        let holder = format!("pca {} (pid {})", command.name(), std::process::id());
        Some(LockSession::acquire(&settings.rpc_addr, &holder).await?)
    } else {
        None
    };
    match build_agent(settings.clone()).await {
        Ok(agent) => Ok((session, agent)),
        Err(e) => {
            if let Some(session) = session {
                session.release().await;
            }
            Err(e)
        }
    }
}

/// Entry point for a parsed command line.
pub async fn run(args: CliArgs, config_path: PathBuf, settings: Settings) -> Result<()> {
    match &args.command {
        Command::Service(command) => command.run(&config_path, settings).await,
        Command::Reconf(command) => command.run(&config_path, &settings).await,
        command => {
            settings.ensure_dirs()?;
            let (session, mut agent) = open_session(command, &settings).await?;

            let mut ctx = CommandContext {
                agent: &mut agent,
                force: args.force,
                interactive: true,
                verbose: args.verbose,
            };
            let outcome = tokio::select! {
                res = command.run(&mut ctx) => res,
                _ = shutdown_signal() => Err(PcaError::Generic("interrupted".to_string())),
            };
            if let Some(session) = session {
                session.release().await;
            }
            outcome
        }
    }
}

/// Parses a command line pulled from the control plane.
pub fn parse_remote(line: &str) -> Result<Command> {
    let argv = std::iter::once("pca").chain(line.split_whitespace());
    let args = CliArgs::try_parse_from(argv)
        .map_err(|e| PcaError::CommandExecError(format!("can't parse '{line}': {e}")))?;
    match args.command {
        Command::Service(_) | Command::Reconf(_) => Err(PcaError::CommandExecError(format!(
            "'{}' is not allowed as a remote command",
            args.command.name()
        ))),
        command => Ok(command),
    }
}

/// Runs a remote command; the caller already holds the operation lock.
pub async fn run_remote(line: &str, agent: &mut Agent) -> Result<()> {
    let command = parse_remote(line)?;
    debug!("Remote command parsed as {:?}", command);
    let mut ctx = CommandContext {
        agent,
        force: true,
        interactive: false,
        verbose: 0,
    };
    command.run(&mut ctx).await
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;
    use crate::daemon::test_support::viewer_record;
    use crate::rpc::{write_line, RpcRequest, RpcResponse};

    #[tokio::test]
    async fn ledger_is_read_after_the_lock_is_taken() {
        let home = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut settings = Settings::with_home(home.path());
        settings.rpc_addr = listener.local_addr().unwrap().to_string();
        settings.ensure_dirs().unwrap();

        // The previous holder finishes its install just before granting the lock.
        let info_dir = settings.info_dir.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut writer) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Some(line) = lines.next_line().await.unwrap() {
                let request: RpcRequest = serde_json::from_str(&line).unwrap();
                if request.method == "lock" {
                    let record = viewer_record();
                    std::fs::write(
                        info_dir.join(record.file_name()),
                        serde_json::to_vec_pretty(&record).unwrap(),
                    )
                    .unwrap();
                }
                write_line(&mut writer, &RpcResponse::ok(request.id, serde_json::Value::Bool(true)))
                    .await
                    .unwrap();
            }
        });

        let command = parse_remote("remove -p 5").unwrap();
        let (session, agent) = open_session(&command, &settings).await.unwrap();
        assert!(session.as_ref().is_some_and(LockSession::is_held));
        assert!(agent.ledger().get(5).is_some());
        if let Some(session) = session {
            session.release().await;
        }
    }

    #[test]
    fn remote_lines_use_the_cli_grammar() {
        match parse_remote("install -c 1 -r 2 -p 30").unwrap() {
            Command::Install(args) => {
                assert_eq!(args.client, Some(1));
                assert_eq!(args.product, Some(2));
                assert_eq!(args.package, Some(30));
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse_remote("remove  -p 4 -p 5").unwrap() {
            Command::Remove(args) => assert_eq!(args.packages, vec![4, 5]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse_remote("update --self").unwrap(),
            Command::Update(UpdateArgs {
                self_update: true,
                ..
            })
        ));
    }

    #[test]
    fn daemon_commands_are_refused_remotely() {
        assert!(matches!(
            parse_remote("service serve"),
            Err(PcaError::CommandExecError(_))
        ));
        assert!(matches!(
            parse_remote("reconf"),
            Err(PcaError::CommandExecError(_))
        ));
        assert!(parse_remote("frobnicate").is_err());
    }

    #[test]
    fn mutating_commands_take_the_lock() {
        assert!(parse_remote("patch -s 3").unwrap().is_mutating());
        assert!(parse_remote("reg").unwrap().is_mutating());
        assert!(!parse_remote("list").unwrap().is_mutating());
    }
}
