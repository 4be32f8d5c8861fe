//! `dirlist`: list a directory through the lister cache and print what the
//! lister reports.
//!
//! ```bash
//! dirlist ~/src                      # list once
//! dirlist --watch --show-hidden .    # keep printing changes until ctrl-c
//! dirlist --filter '*.rs *.toml' --config lister.toml /etc
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};
use url::Url;
use vfs_item::{Item, url_from_path};
use vfs_lister::{DirListerService, ListerConfig, ListerEvent, ListerHandle, OpenFlags};

/// List a directory and optionally keep watching it.
#[derive(Parser, Debug)]
#[command(name = "dirlist")]
#[command(about = "List directories through the shared lister cache")]
struct Args {
    /// Directory path or URL
    #[arg(default_value = ".")]
    target: String,

    /// Keep running and print changes until interrupted
    #[arg(short, long)]
    watch: bool,

    /// Show dot files and names listed in `.hidden`
    #[arg(short = 'a', long)]
    show_hidden: bool,

    /// Whitespace-separated wildcard patterns, e.g. "*.rs *.md"
    #[arg(short, long)]
    filter: Option<String>,

    /// Only show directories
    #[arg(short, long)]
    dirs_only: bool,

    /// Lister configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ListerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ListerConfig::default(),
    };
    let url = parse_target(&args.target)?;

    let service = DirListerService::start(config)?;
    let mut lister = service.new_lister().await?;
    lister.set_show_hidden(args.show_hidden).await?;
    lister.set_dir_only(args.dirs_only).await?;
    if let Some(filter) = &args.filter {
        lister.set_name_filter(filter).await?;
    }
    lister.set_auto_update(args.watch).await?;

    info!("Listing {url}");
    lister.open_url(&url, OpenFlags::NONE).await?;
    let outcome = print_events(&mut lister, args.watch).await;

    drop(lister);
    service.shutdown().await?;
    outcome
}

/// Print events until the listing ends, or until ctrl-c with `watch`.
async fn print_events(lister: &mut ListerHandle, watch: bool) -> Result<()> {
    loop {
        let event = tokio::select! {
            event = lister.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        };
        let Some(event) = event else {
            bail!("lister service stopped");
        };

        match event {
            ListerEvent::Started(url) => info!("Started {url}"),
            ListerEvent::Clear => println!("(cleared)"),
            ListerEvent::ClearDir(url) => println!("(cleared {url})"),
            ListerEvent::ItemsAdded { items, .. } => {
                for item in &items {
                    println!("+ {}", describe(item));
                }
            }
            ListerEvent::ItemsFilteredByMime(_) => {}
            ListerEvent::RefreshItems(pairs) => {
                for (old, new) in &pairs {
                    if old.url() == new.url() {
                        println!("~ {}", describe(new));
                    } else {
                        println!("~ {} -> {}", old.name(), describe(new));
                    }
                }
            }
            ListerEvent::ItemsDeleted(items) => {
                for item in &items {
                    println!("- {}", item.name());
                }
            }
            ListerEvent::Redirection { from, to } => println!("(moved {from} -> {to})"),
            ListerEvent::ListingDirCompleted(url) => info!("Listed {url}"),
            ListerEvent::ListingDirCanceled(url) => info!("Canceled {url}"),
            ListerEvent::JobError { url, error } => {
                bail!("cannot list {url}: {error} (code {})", error.code());
            }
            ListerEvent::Completed | ListerEvent::Canceled => {
                if !watch {
                    return Ok(());
                }
            }
        }
    }
}

fn describe(item: &Item) -> String {
    if item.is_dir() {
        format!("{}/", item.name())
    } else {
        format!(
            "{}  {}  {}",
            item.name(),
            item.size().unwrap_or_default(),
            item.mime_type()
        )
    }
}

/// Accept a URL with a scheme, or a local path.
fn parse_target(target: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(target) {
        // `C:\dir` parses with scheme `c`.
        if url.scheme().len() > 1 {
            return Ok(url);
        }
    }
    let path = std::path::absolute(Path::new(target))
        .with_context(|| format!("resolving {target}"))?;
    url_from_path(&path).with_context(|| format!("{} is not a usable path", path.display()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_target_keeps_urls() {
        let url = parse_target("sftp://host/srv").unwrap();
        assert_eq!(url.as_str(), "sftp://host/srv");
    }

    #[test]
    fn test_parse_target_resolves_relative_paths() {
        let url = parse_target("some/dir").unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/some/dir"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["dirlist", "--watch", "-a", "--filter", "*.rs", "/tmp"]);
        assert!(args.watch);
        assert!(args.show_hidden);
        assert!(!args.dirs_only);
        assert_eq!(args.filter.as_deref(), Some("*.rs"));
        assert_eq!(args.target, "/tmp");
    }
}
