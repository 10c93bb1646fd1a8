use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "depot",
    about = "Depot -- blob store and caching proxy",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (defaults to ./depot.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory, overriding the config file
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store a file as a new blob
    Put(PutArgs),
    /// Write a blob's content to a file or stdout
    Get(GetArgs),
    /// Tombstone a blob
    Delete(DeleteArgs),
    /// Reclaim space held by tombstoned blobs
    Compact,
    /// List blob records
    List(ListArgs),
    /// Show blob store totals
    Stats,
    /// Fetch a path through the caching proxy
    Fetch(FetchArgs),
    /// Expire everything the proxy has cached
    Invalidate,
}

#[derive(Args)]
pub struct PutArgs {
    pub file: PathBuf,
    /// Logical name recorded with the blob (defaults to the file name)
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub content_type: Option<String>,
}

#[derive(Args)]
pub struct GetArgs {
    pub id: String,
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Skip size and SHA-1 verification
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub id: String,
}

#[derive(Args)]
pub struct ListArgs {
    /// Include tombstoned blobs
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Args)]
pub struct FetchArgs {
    /// Path relative to the remote root
    pub path: String,
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Remote URL, overriding the config file
    #[arg(long)]
    pub remote: Option<String>,
}
