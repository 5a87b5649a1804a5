use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use bindgraph_types::{BindId, ResourceId};

#[derive(Parser)]
#[command(
    name = "bindgraph",
    about = "Inspect and edit the bind graph of a resource repository",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML configuration file (default: ./bindgraph.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database, overriding the configured path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the database and its tables
    Init,
    /// Name a resource inside a collection
    Bind(BindArgs),
    /// Remove a name and release the resource for an orphan check
    Unbind(BindArgs),
    /// Move or rename a bind
    Mv(MvArgs),
    /// List the members of a collection
    Ls(LsArgs),
    /// Resolve a path segment by segment
    Resolve(ResolveArgs),
    /// Shortest path between two resources
    Path(PathArgs),
    /// List the binds naming a resource
    Parents(ParentsArgs),
    /// Queue resources for an orphan check
    Enqueue(EnqueueArgs),
    /// Show waiting cleanup requests without taking them
    Queue(QueueArgs),
    /// Delete queued resources that are no longer reachable
    Sweep(SweepArgs),
}

#[derive(Debug, Args)]
pub struct BindArgs {
    pub collection: ResourceId,
    pub resource: ResourceId,
    pub name: String,
}

#[derive(Debug, Args)]
pub struct MvArgs {
    pub src_collection: ResourceId,
    pub src_name: String,
    pub dst_collection: ResourceId,
    pub dst_name: String,
    /// Overwrite an existing bind at the destination
    #[arg(long)]
    pub replace: bool,
}

#[derive(Debug, Args)]
pub struct LsArgs {
    /// Collection to list (default: the root)
    pub collection: Option<ResourceId>,
    /// Include a bind of the collection to itself
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    pub path: String,
}

#[derive(Debug, Args)]
pub struct PathArgs {
    pub from: ResourceId,
    pub to: ResourceId,
    /// Pretend these binds do not exist
    #[arg(long = "exclude", value_name = "BIND_ID")]
    pub exclude: Vec<BindId>,
}

#[derive(Debug, Args)]
pub struct ParentsArgs {
    pub resource: ResourceId,
}

#[derive(Debug, Args)]
pub struct EnqueueArgs {
    #[arg(required = true)]
    pub resources: Vec<ResourceId>,
}

#[derive(Debug, Args)]
pub struct QueueArgs {
    /// Show at most this many requests
    #[arg(short = 'n', long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Handle at most this many requests (default: the configured batch)
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    /// Keep polling the queue until killed
    #[arg(short, long, conflicts_with = "limit")]
    pub follow: bool,
}
