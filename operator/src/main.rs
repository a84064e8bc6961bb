//! Operator is a long lived process that turns Attack resources into vegeta jobs.
#![deny(missing_docs)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use vegeta_common::telemetry::{self, LogFormat};
use vegeta_operator::attack::{self, AttackDefaults, ControllerOpts};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Format of the log lines written to stdout.
    #[arg(long, env = "VEGETA_OPERATOR_LOG_FORMAT", value_enum, default_value_t)]
    log_format: LogFormat,

    /// Export traces and metrics to this OTLP collector.
    #[arg(long, env = "VEGETA_OPERATOR_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

/// Available Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a daemon process that reconciles Attack resources
    Daemon(DaemonOpts),
}

/// Options for the daemon subcommand
#[derive(Parser, Debug)]
pub struct DaemonOpts {
    /// Image of the attack container when the attack does not set one.
    #[arg(
        long,
        env = "VEGETA_OPERATOR_IMAGE",
        default_value = "peterevans/vegeta:6.7"
    )]
    vegeta_image: String,

    /// Pull policy of the attack container when the attack does not set one.
    #[arg(
        long,
        env = "VEGETA_OPERATOR_IMAGE_PULL_POLICY",
        default_value = "IfNotPresent"
    )]
    image_pull_policy: String,

    /// Maximum number of attacks reconciled concurrently, 0 is unbounded.
    #[arg(long, env = "VEGETA_OPERATOR_CONCURRENCY", default_value_t = 1)]
    concurrency: u16,

    /// Do not mount the nsswitch config map into attack pods.
    #[arg(long, env = "VEGETA_OPERATOR_NO_NSSWITCH")]
    no_nsswitch: bool,

    /// Only watch attacks in this namespace.
    #[arg(long, env = "VEGETA_OPERATOR_NAMESPACE")]
    namespace: Option<String>,
}

impl From<DaemonOpts> for ControllerOpts {
    fn from(opts: DaemonOpts) -> Self {
        ControllerOpts {
            defaults: AttackDefaults {
                image: opts.vegeta_image,
                image_pull_policy: opts.image_pull_policy,
                nsswitch: !opts.no_nsswitch,
                ..Default::default()
            },
            concurrency: opts.concurrency,
            namespace: opts.namespace,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let telemetry = telemetry::init("vegeta-operator", args.log_format, args.otlp_endpoint)?;

    info!(?args.command, "starting operator");
    match args.command {
        Command::Daemon(opts) => attack::run(opts.into()).await?,
    };

    // Flush traces and metrics before shutdown
    telemetry.shutdown()?;
    Ok(())
}
