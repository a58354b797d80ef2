use std::{future::Future, path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::commands::{ClearCommand, CompletionsCommand, SamlCommand, SpecificCommand};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "aws-cli-auth",
    version,
    about = "CLI tool for retrieving AWS temporary credentials",
    long_about = "CLI tool for retrieving AWS temporary credentials using SAML providers, AWS SSO, \
or a specified method of retrieval (WEB_ID).\n\
Credentials are returned as a credential_process payload on stdout, or stored under a \
named profile of the AWS credentials file."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted by every subcommand
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    #[arg(
        long,
        global = true,
        value_delimiter = ',',
        help = "Roles to assume from the base credentials, in the order given"
    )]
    pub role_chain: Option<Vec<String>>,

    #[arg(
        short = 's',
        long = "store-profile",
        global = true,
        requires = "cfg_section",
        help = "Store the credentials under the --cfg-section profile instead of printing them"
    )]
    pub store_profile: bool,

    #[arg(
        long,
        global = true,
        help = "Section of the config file to read, and profile name in the AWS credentials file"
    )]
    pub cfg_section: Option<String>,

    #[arg(
        short = 'd',
        long,
        global = true,
        help = "Max session duration of the final role, in seconds [900-43200]"
    )]
    pub max_duration: Option<i32>,

    #[arg(short = 'c', long, global = true, help = "Custom location of the config file")]
    pub config_file: Option<PathBuf>,

    #[arg(short = 'v', long, global = true, action = ArgAction::Count, help = "Increase verbosity (-v info, -vv debug, -vvv trace)")]
    pub verbose: u8,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Get AWS credentials through your SAML provider or AWS SSO login")]
    Saml(SamlCommand),
    #[command(about = "Exchange a specific credential provider's identity (WEB_ID) for AWS credentials")]
    Specific(SpecificCommand),
    #[command(name = "clear-cache", about = "Clear stored credentials from the OS secret store")]
    ClearCache(ClearCommand),
    #[command(about = "Generate shell completion scripts for aws-cli-auth")]
    Completions(CompletionsCommand),
}

impl Cli {
    pub async fn execute(self, cancel: CancellationToken) -> Result<()> {
        let global = self.global;

        match self.command {
            Commands::Saml(cmd) => cmd.execute(&global, cancel).await,
            Commands::Specific(cmd) => cmd.execute(&global).await,
            Commands::ClearCache(cmd) => cmd.execute(),
            Commands::Completions(cmd) => {
                cmd.execute();
                Ok(())
            }
        }
    }
}

/// Time an interrupted command gets to close its browser session
pub const INTERRUPT_GRACE_PERIOD: Duration = Duration::from_secs(8);

/// Run `task` until it finishes or `cancel` fires
///
/// After cancellation the task keeps running for at most `grace`, so a
/// pending capture can tear its browser down. The result is always an
/// error once cancelled.
pub async fn until_interrupted<T>(
    task: impl Future<Output = Result<T>>,
    cancel: &CancellationToken,
    grace: Duration,
) -> Result<T> {
    tokio::pin!(task);

    tokio::select! {
        biased;
        result = &mut task => return result,
        () = cancel.cancelled() => {}
    }

    if time::timeout(grace, &mut task).await.is_err() {
        warn!("Command did not stop within {:?} of the interrupt", grace);
    }
    bail!("interrupted")
}
