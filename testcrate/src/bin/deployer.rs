use std::{io::IsTerminal, net::Ipv4Addr, path::PathBuf, time::Duration};

use clap::{error::ErrorKind, CommandFactory, Parser};
use remote_deployer::{
    ExecutionPipeline, HostKeyPolicy, HostSetup, Phase, PipelineOptions, ScriptBuilder, Secret,
    SessionOptions, SshSession, Target, DEFAULT_WORKING_DIR,
};
use stacked_errors::{Result, StackableErr};
use tracing_subscriber::EnvFilter;

/// Deploys containers on a remote host over ssh, configuring the host
/// beforehand if asked to
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    /// The command to exec: config, initiate, build, deploy, healthcheck, all,
    /// or restart
    #[arg(value_name = "COMMAND")]
    phase: Phase,
    /// A valid IPv4 address
    #[arg(value_name = "REMOTE_IP")]
    remote_ip: Ipv4Addr,
    /// The services to interact with, "api" and "test" if none are given
    #[arg(value_name = "SERVICE")]
    services: Vec<String>,
    /// User used to initiate the connection
    #[arg(short, long, default_value = "root", env = "DEPLOYER_USER")]
    user: String,
    /// Password used to initiate the connection
    #[arg(
        short,
        long = "pass",
        default_value = "root",
        env = "DEPLOYER_PASSWORD",
        hide_env_values = true
    )]
    password: String,
    /// Identity file used to initiate the connection instead of the password
    #[arg(short, long = "identity", env = "DEPLOYER_IDENTITY")]
    identity: Option<PathBuf>,
    /// Passphrase of an encrypted identity file
    #[arg(long, env = "DEPLOYER_IDENTITY_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,
    #[arg(long, default_value_t = 22)]
    port: u16,
    /// Echo every command and its output
    #[arg(short, long)]
    verbose: bool,
    /// Directory shipped to the host, also the remote destination
    #[arg(long, default_value = DEFAULT_WORKING_DIR, env = "DEPLOYER_WORKDIR")]
    workdir: String,
    /// Only accept host keys listed in this known_hosts file. Without it any
    /// host key is trusted.
    #[arg(long)]
    known_hosts: Option<PathBuf>,
    /// Fail a remote command that takes longer than this many seconds
    #[arg(long)]
    command_timeout: Option<u64>,
    /// Never draw the progress line
    #[arg(long)]
    no_progress: bool,
    /// Print the script that would be sent and exit without connecting
    #[arg(long)]
    dry_run: bool,
    /// Package repository distribution used by `config`
    #[arg(long, default_value = "debian")]
    distribution: String,
    /// Package repository release used by `config`
    #[arg(long, default_value = "stretch")]
    release: String,
    /// Package repository architecture used by `config`
    #[arg(long, default_value = "amd64")]
    arch: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // diagnostics go to stderr so that they never tear the progress line
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let args = Args::parse();
    if let Err(e) = args.phase.validate_services(&args.services) {
        Args::command().error(ErrorKind::ValueValidation, e).exit();
    }

    let builder = ScriptBuilder::new(&args.workdir, &args.services).host_setup(HostSetup {
        distribution: args.distribution.clone(),
        release: args.release.clone(),
        arch: args.arch.clone(),
    });
    let script = builder.render(args.phase).await.stack()?;
    if args.dry_run {
        print!("{}", script.with_priming());
        return Ok(())
    }

    let secret = match args.identity {
        Some(path) => Secret::IdentityFile {
            path,
            passphrase: args.passphrase,
        },
        None => Secret::Password(args.password),
    };
    let target = Target::new(args.remote_ip, &args.user, secret).port(args.port);
    let session_options = SessionOptions::default()
        .host_key_policy(match args.known_hosts {
            Some(path) => HostKeyPolicy::KnownHosts(path),
            None => HostKeyPolicy::AcceptAny,
        })
        .command_timeout(args.command_timeout.map(Duration::from_secs));
    let terminal = std::io::stdout().is_terminal();
    let options = PipelineOptions::default()
        .verbose(args.verbose)
        .show_progress(terminal && !args.no_progress)
        .color(terminal);

    let mut pipeline = ExecutionPipeline::new(SshSession::new(session_options), options);
    let outcome = pipeline.run(&target, script).await.stack()?;
    if !outcome.is_completed() {
        // the failing command was already reported
        std::process::exit(1)
    }
    Ok(())
}
