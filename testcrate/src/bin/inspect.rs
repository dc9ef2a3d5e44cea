use clap::{Parser, Subcommand};
use remote_deployer::inspect::{connect_docker, describe_container, list_containers};
use stacked_errors::{Result, StackableErr};
use tracing_subscriber::EnvFilter;

/// Prints what the local container engine knows about its containers as JSON
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    #[command(subcommand)]
    query: Query,
}

#[derive(Subcommand, Debug)]
enum Query {
    /// Names and ids of the containers
    List {
        /// Include stopped containers
        #[arg(short, long)]
        all: bool,
    },
    /// One container, `{}` if it does not exist
    Describe {
        /// Container id or name
        id: String,
        /// The full inspection record instead of the summary
        #[arg(short, long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let args = Args::parse();
    let docker = connect_docker().await.stack()?;
    let value = match args.query {
        Query::List { all } => list_containers(&docker, all).await.stack()?,
        Query::Describe { id, all } => describe_container(&docker, &id, all).await.stack()?,
    };
    println!("{}", serde_json::to_string_pretty(&value).stack()?);
    Ok(())
}
