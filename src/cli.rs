//! Command-line front end driving a [`Session`] with a [`TerminalHost`].

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;

use crate::config::{Config, MountConfig};
use crate::mapper::{PathMapper, unescape_spaces};
use crate::session::{DocumentId, RemoteCatalog, Session};
use crate::shell::Dispatcher;
use crate::terminal::{TerminalHost, line_col};

#[derive(Parser, Debug)]
#[command(
    name = "remotion",
    version,
    about = "Work on a remotely mounted project as if it were local"
)]
pub struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, global = true, env = "REMOTION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for cached remote listings.
    #[arg(long, global = true, env = "REMOTION_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Emit JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Seconds to wait for remote commands.
    #[arg(long, global = true, default_value_t = 60)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show which mount a path belongs to and its counterpart path.
    Resolve { path: String },

    /// Print the remote modification time of a mounted file.
    Mtime { path: String },

    /// List files in the default mount's remote project.
    Ls {
        /// Ignore the cached listing.
        #[arg(long)]
        force: bool,
        /// Pick a file and print its local path.
        #[arg(long)]
        open: bool,
        /// Row to pick instead of asking.
        #[arg(long)]
        pick: Option<usize>,
    },

    /// Look up a symbol in the remote tag index.
    Tag {
        symbol: Option<String>,
        /// File whose mount (and word at the start) is used.
        #[arg(long)]
        from: Option<String>,
        /// Row to pick among several matches instead of asking.
        #[arg(long)]
        pick: Option<usize>,
    },

    /// Print the effective configuration.
    Config,
}

#[derive(Debug, Serialize)]
struct Resolution {
    input: String,
    mount: Option<MountConfig>,
    local_path: Option<String>,
    remote_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct Location {
    path: String,
    offset: usize,
    line: usize,
    column: usize,
}

pub fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("loading configuration")?;

    match &cli.command {
        Commands::Resolve { path } => resolve(&cli, &config, path),
        Commands::Config => {
            print!("{}", config.to_toml().context("serializing configuration")?);
            Ok(())
        }
        Commands::Mtime { path } => mtime(&cli, config, path),
        Commands::Ls { force, open, pick } => ls(&cli, config, *force, *open, *pick),
        Commands::Tag { symbol, from, pick } => {
            tag(&cli, config, symbol.as_deref(), from.as_deref(), *pick)
        }
    }
}

fn resolve(cli: &Cli, config: &Config, path: &str) -> Result<()> {
    let mapper = PathMapper::from_config(config);
    let resolution = if let Some(mount) = mapper.resolve_for_local(path) {
        Resolution {
            input: path.to_string(),
            mount: Some(mount.clone()),
            local_path: Some(path.to_string()),
            remote_path: Some(unescape_spaces(&PathMapper::to_remote(path, mount))),
        }
    } else {
        Resolution {
            input: path.to_string(),
            mount: mapper.resolve_for_remote(path).cloned(),
            local_path: mapper.to_local(path),
            remote_path: mapper.resolve_for_remote(path).map(|_| path.to_string()),
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&resolution)?);
        return Ok(());
    }
    let Some(mount) = &resolution.mount else {
        bail!("no mount configured for {path}");
    };
    println!("{} {}", "host:".dimmed(), mount.host().unwrap_or("(local)"));
    println!(
        "{} {}",
        "local:".dimmed(),
        resolution.local_path.as_deref().unwrap_or("-")
    );
    println!(
        "{} {}",
        "remote:".dimmed(),
        resolution.remote_path.as_deref().unwrap_or("-")
    );
    Ok(())
}

fn data_dir(cli: &Cli) -> PathBuf {
    cli.data_dir.clone().unwrap_or_else(crate::default_data_dir)
}

fn start_session(
    config: Config,
    host: TerminalHost,
    catalog: Option<RemoteCatalog>,
) -> Result<(Session, Dispatcher<Session>)> {
    let dispatcher = Dispatcher::new();
    let mut session =
        Session::new(config, Box::new(host), &dispatcher).context("starting command workers")?;
    if let Some(catalog) = catalog {
        session = session.with_catalog(catalog);
    }
    Ok((session, dispatcher))
}

fn wait(cli: &Cli, session: &mut Session, dispatcher: &mut Dispatcher<Session>) -> Result<()> {
    if !dispatcher.run_until_idle(session, Duration::from_secs(cli.timeout)) {
        bail!("timed out after {}s waiting for remote commands", cli.timeout);
    }
    Ok(())
}

fn mtime(cli: &Cli, config: Config, path: &str) -> Result<()> {
    let (mut session, mut dispatcher) = start_session(config, TerminalHost::new(), None)?;
    let (tx, rx) = crossbeam_channel::bounded(1);
    session
        .remote_mtime(path, move |_, mtime| {
            let _ = tx.send(mtime);
        })
        .ok_or_else(|| anyhow!("no mount configured for {path}"))?;
    wait(cli, &mut session, &mut dispatcher)?;

    let mtime = rx
        .try_recv()
        .map_err(|_| anyhow!("remote command produced no modification time"))?;
    if cli.json {
        println!("{}", serde_json::json!({ "path": path, "mtime": mtime }));
    } else {
        let when = chrono::DateTime::from_timestamp(mtime.trunc() as i64, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        println!("{mtime}\t{when}");
    }
    Ok(())
}

fn ls(cli: &Cli, config: Config, force: bool, open: bool, pick: Option<usize>) -> Result<()> {
    let dir = data_dir(cli);
    let catalog_file = crate::catalog_path(&dir);
    let catalog = RemoteCatalog::load(&catalog_file, config.cache_timeout)
        .map_err(|e| tracing::warn!(path = %catalog_file.display(), error = %e, "ignoring unreadable catalog"))
        .ok();
    let Some(mount) = config.default_mount().cloned() else {
        bail!("no mounts configured");
    };

    let host = TerminalHost::new().with_preselect(pick);
    let (mut session, mut dispatcher) = start_session(config, host, catalog)?;
    let (tx, rx) = crossbeam_channel::bounded(1);
    session.list_files_with(&mount, force, move |session, mount, files| {
        let opened = open.then(|| session.present_files(mount, &files)).flatten();
        let _ = tx.send((files, opened));
    });
    wait(cli, &mut session, &mut dispatcher)?;

    if let Err(e) = session.catalog().save(&catalog_file) {
        tracing::warn!(path = %catalog_file.display(), error = %e, "failed to save catalog");
    }

    let (files, opened) = rx
        .try_recv()
        .map_err(|_| anyhow!("remote listing failed"))?;
    if open {
        let doc = opened.ok_or_else(|| anyhow!("nothing opened"))?;
        return print_location(cli, &session, doc);
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&files)?);
    } else {
        for file in files {
            println!("{file}");
        }
    }
    Ok(())
}

fn tag(
    cli: &Cli,
    config: Config,
    symbol: Option<&str>,
    from: Option<&str>,
    pick: Option<usize>,
) -> Result<()> {
    let host = TerminalHost::new().with_preselect(pick);
    let (mut session, mut dispatcher) = start_session(config, host, None)?;

    let context_doc = match from {
        Some(path) => Some(
            session
                .host_mut()
                .open_file(path)
                .ok_or_else(|| anyhow!("cannot read {path}"))?,
        ),
        None => None,
    };
    let symbol = session
        .resolve_symbol(context_doc, symbol)
        .ok_or_else(|| anyhow!("no symbol given"))?;

    let (tx, rx) = crossbeam_channel::bounded(1);
    session
        .lookup_tag(context_doc, &symbol, move |session, mount, tags| {
            let _ = tx.send(session.present_tags(&mount, tags));
        })
        .ok_or_else(|| anyhow!("no mounts configured"))?;
    wait(cli, &mut session, &mut dispatcher)?;

    match rx.try_recv() {
        Ok(Some(doc)) => print_location(cli, &session, doc),
        Ok(None) => Ok(()),
        Err(_) => bail!("tag lookup failed"),
    }
}

fn print_location(cli: &Cli, session: &Session, doc: DocumentId) -> Result<()> {
    let host = session.host();
    let path = host
        .document_path(doc)
        .ok_or_else(|| anyhow!("opened document has no path"))?;
    let (text, offset) = host.buffer(doc).unwrap_or_default();
    let (line, column) = line_col(&text, offset);
    let location = Location {
        path,
        offset,
        line,
        column,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&location)?);
    } else {
        println!("{}:{}:{}", location.path, location.line, location.column);
    }
    Ok(())
}
