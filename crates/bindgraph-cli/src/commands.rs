use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use tracing::debug;

use bindgraph::{BindGraph, GraphConfig, NoopLifecycle, Rebound};
use bindgraph_store::Transactional;
use bindgraph_types::Bind;

use crate::cli::*;

const DEFAULT_CONFIG_FILE: &str = "bindgraph.toml";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref(), cli.db)?;
    let store = config
        .sqlite
        .open()
        .with_context(|| format!("opening {}", config.sqlite.path.display()))?;
    let graph = BindGraph::with_config(store, config);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    execute(&graph, cli.command, cli.format, &mut out)
}

/// `--config` if given, else `./bindgraph.toml` if present, else defaults.
/// `--db` overrides the configured database path.
fn load_config(path: Option<&Path>, db: Option<PathBuf>) -> anyhow::Result<GraphConfig> {
    let mut config = match path {
        Some(path) => GraphConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => GraphConfig::load(DEFAULT_CONFIG_FILE)?,
        None => GraphConfig::default(),
    };
    if let Some(db) = db {
        config.sqlite.path = db;
    }
    config.validate()?;
    debug!(db = %config.sqlite.path.display(), "configuration loaded");
    Ok(config)
}

pub fn execute<S: Transactional>(
    graph: &BindGraph<S>,
    command: Command,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Command::Init => cmd_init(graph, format, out),
        Command::Bind(args) => cmd_bind(graph, args, format, out),
        Command::Unbind(args) => cmd_unbind(graph, args, format, out),
        Command::Mv(args) => cmd_mv(graph, args, format, out),
        Command::Ls(args) => cmd_ls(graph, args, format, out),
        Command::Resolve(args) => cmd_resolve(graph, args, format, out),
        Command::Path(args) => cmd_path(graph, args, format, out),
        Command::Parents(args) => cmd_parents(graph, args, format, out),
        Command::Enqueue(args) => cmd_enqueue(graph, args, format, out),
        Command::Queue(args) => cmd_queue(graph, args, format, out),
        Command::Sweep(args) => cmd_sweep(graph, args, format, out),
    }
}

fn cmd_init<S: Transactional>(
    graph: &BindGraph<S>,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let config = graph.config();
    match format {
        OutputFormat::Json => writeln!(
            out,
            "{}",
            json!({
                "database": config.sqlite.path,
                "root": config.root_collection,
                "pending": graph.pending_cleanups()?,
            })
        )?,
        OutputFormat::Text => {
            writeln!(
                out,
                "{} Initialized bind graph in {}",
                "✓".green().bold(),
                config.sqlite.path.display().to_string().bold()
            )?;
            writeln!(out, "  Root collection: {}", config.root_collection.to_string().cyan())?;
        }
    }
    Ok(())
}

fn cmd_bind<S: Transactional>(
    graph: &BindGraph<S>,
    args: BindArgs,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let id = graph.bind_resource(args.collection, args.resource, &args.name)?;
    match format {
        OutputFormat::Json => writeln!(
            out,
            "{}",
            json!({
                "bind": id,
                "collection": args.collection,
                "resource": args.resource,
                "name": args.name,
            })
        )?,
        OutputFormat::Text => writeln!(
            out,
            "{} Bound {} as {} in {} (bind {})",
            "✓".green().bold(),
            args.resource.to_string().cyan(),
            args.name.yellow(),
            args.collection.to_string().cyan(),
            id
        )?,
    }
    Ok(())
}

fn cmd_unbind<S: Transactional>(
    graph: &BindGraph<S>,
    args: BindArgs,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let removed = graph.unbind_resource(args.collection, args.resource, &args.name)?;
    let deferred = graph.config().deferred_cleanup;
    let fate = if deferred { "queued for cleanup" } else { "reclaimed if orphaned" };
    match format {
        OutputFormat::Json => writeln!(
            out,
            "{}",
            json!({ "removed": removed, "resource": args.resource, "deferred": deferred })
        )?,
        OutputFormat::Text if removed => writeln!(
            out,
            "{} Unbound {} from {}; resource {} {}",
            "✓".green().bold(),
            args.name.yellow(),
            args.collection.to_string().cyan(),
            args.resource.to_string().cyan(),
            fate
        )?,
        OutputFormat::Text => writeln!(
            out,
            "No bind {} -> {} in {}; resource {} {}",
            args.name.yellow(),
            args.resource,
            args.collection,
            args.resource.to_string().cyan(),
            fate
        )?,
    }
    Ok(())
}

fn cmd_mv<S: Transactional>(
    graph: &BindGraph<S>,
    args: MvArgs,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let Rebound { bind, displaced } = if args.replace {
        graph.rebind_replacing(
            args.src_collection,
            &args.src_name,
            args.dst_collection,
            &args.dst_name,
        )?
    } else {
        let bind = graph.rebind_resource(
            args.src_collection,
            &args.src_name,
            args.dst_collection,
            &args.dst_name,
        )?;
        Rebound { bind, displaced: None }
    };

    match format {
        OutputFormat::Json => writeln!(
            out,
            "{}",
            json!({ "bind": bind, "displaced": displaced })
        )?,
        OutputFormat::Text => {
            writeln!(
                out,
                "{} Moved {}/{} to {}/{} (bind {})",
                "✓".green().bold(),
                args.src_collection,
                args.src_name.yellow(),
                args.dst_collection,
                args.dst_name.yellow(),
                bind.id
            )?;
            if let Some(old) = displaced {
                let fate = if graph.config().deferred_cleanup {
                    "queued for cleanup"
                } else {
                    "reclaimed if orphaned"
                };
                writeln!(
                    out,
                    "  Replaced bind {}; resource {} {}",
                    old.id,
                    old.resource.to_string().cyan(),
                    fate
                )?;
            }
        }
    }
    Ok(())
}

fn cmd_ls<S: Transactional>(
    graph: &BindGraph<S>,
    args: LsArgs,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let collection = args.collection.unwrap_or_else(|| graph.root());
    let children = graph.list_children(collection, !args.all)?;
    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(&children)?)?,
        OutputFormat::Text => {
            if children.is_empty() {
                writeln!(out, "Collection {} is empty.", collection)?;
            }
            for bind in &children {
                write_bind_row(out, bind)?;
            }
        }
    }
    Ok(())
}

fn cmd_resolve<S: Transactional>(
    graph: &BindGraph<S>,
    args: ResolveArgs,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let steps = graph.resolve_path(&args.path)?;
    match format {
        OutputFormat::Json => {
            let steps: Vec<_> = steps
                .iter()
                .map(|step| {
                    json!({
                        "name": step.name,
                        "collection": step.collection,
                        "resource": step.resource(),
                        "bind": step.bind.as_ref().map(|b| b.id),
                    })
                })
                .collect();
            writeln!(out, "{}", serde_json::to_string(&steps)?)?;
        }
        OutputFormat::Text => {
            if steps.is_empty() {
                writeln!(out, "/ -> {}", graph.root().to_string().cyan())?;
            }
            for step in &steps {
                match &step.bind {
                    Some(bind) => writeln!(
                        out,
                        "{} -> {} (bind {})",
                        step.name.yellow(),
                        bind.resource.to_string().cyan(),
                        bind.id
                    )?,
                    None => writeln!(out, "{} -> {}", step.name.yellow(), "not found".red())?,
                }
            }
        }
    }
    Ok(())
}

fn cmd_path<S: Transactional>(
    graph: &BindGraph<S>,
    args: PathArgs,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let excluded: BTreeSet<_> = args.exclude.into_iter().collect();
    let path = graph.shortest_path_excluding(args.from, args.to, &excluded)?;
    match format {
        OutputFormat::Json => writeln!(
            out,
            "{}",
            json!({
                "from": args.from,
                "to": args.to,
                "reachable": path.is_reachable(),
                "path": path.as_path(),
            })
        )?,
        OutputFormat::Text if path.is_reachable() => writeln!(out, "{}", path.to_string().green())?,
        OutputFormat::Text => writeln!(out, "{}", path.to_string().red())?,
    }
    Ok(())
}

fn cmd_parents<S: Transactional>(
    graph: &BindGraph<S>,
    args: ParentsArgs,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let parents = graph.parent_set(args.resource)?;
    let canonical = graph.canonical_path(args.resource)?;
    match format {
        OutputFormat::Json => writeln!(
            out,
            "{}",
            json!({
                "resource": args.resource,
                "binds": parents,
                "canonical": canonical.as_path(),
            })
        )?,
        OutputFormat::Text => {
            writeln!(out, "Resource {}", args.resource.to_string().cyan().bold())?;
            writeln!(out, "  Canonical path: {}", canonical)?;
            writeln!(out, "  Binds: {}", parents.len())?;
            for bind in &parents {
                write_bind_row(out, bind)?;
            }
        }
    }
    Ok(())
}

fn cmd_enqueue<S: Transactional>(
    graph: &BindGraph<S>,
    args: EnqueueArgs,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let queued = graph.enqueue(&args.resources)?;
    let pending = graph.pending_cleanups()?;
    match format {
        OutputFormat::Json => writeln!(out, "{}", json!({ "queued": queued, "pending": pending }))?,
        OutputFormat::Text => writeln!(
            out,
            "{} Queued {} resource(s), {} pending",
            "✓".green().bold(),
            queued,
            pending
        )?,
    }
    Ok(())
}

fn cmd_queue<S: Transactional>(
    graph: &BindGraph<S>,
    args: QueueArgs,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let requests = graph.pending_requests(args.limit)?;
    let pending = graph.pending_cleanups()?;
    match format {
        OutputFormat::Json => writeln!(
            out,
            "{}",
            json!({ "pending": pending, "requests": requests })
        )?,
        OutputFormat::Text => {
            if requests.is_empty() {
                writeln!(out, "Cleanup queue is empty.")?;
            }
            for request in &requests {
                writeln!(out, "{:>6}  {}", request.id, request.resource.to_string().cyan())?;
            }
            if pending > requests.len() {
                writeln!(out, "  … {} more", pending - requests.len())?;
            }
        }
    }
    Ok(())
}

fn cmd_sweep<S: Transactional>(
    graph: &BindGraph<S>,
    args: SweepArgs,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let sweeper = graph.sweeper(&NoopLifecycle);
    let report = if args.follow {
        // Runs until the process is killed.
        let stop = AtomicBool::new(false);
        sweeper.run(&stop)
    } else {
        sweeper.drain(args.limit.unwrap_or(graph.config().sweep_batch))?
    };
    let pending = graph.pending_cleanups()?;

    match format {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(report)?;
            value["pending"] = json!(pending);
            writeln!(out, "{value}")?;
        }
        OutputFormat::Text => {
            writeln!(
                out,
                "{} Sweep: {} examined, {} deleted, {} kept",
                "✓".green().bold(),
                report.examined,
                report.deleted.to_string().red(),
                report.kept.to_string().green()
            )?;
            if report.failed > 0 {
                writeln!(
                    out,
                    "  {} refused by the lifecycle and dropped",
                    report.failed.to_string().yellow()
                )?;
            }
            if pending > 0 {
                writeln!(out, "  {} request(s) still pending", pending)?;
            }
        }
    }
    Ok(())
}

fn write_bind_row(out: &mut impl Write, bind: &Bind) -> io::Result<()> {
    writeln!(
        out,
        "{:>6}  {:>6} -> {:<6}  {}  {}",
        bind.id,
        bind.collection,
        bind.resource,
        bind.updated_at.to_string().dimmed(),
        bind.name.yellow()
    )
}
