//! Watch mode: rebuild after input changes settle.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use wasmpipe_lib::config::BuildConfig;
use wasmpipe_lib::orchestrator::BuildOrchestrator;

use crate::cmd::{BuildArgs, build_once, load};
use crate::output::{print_error, print_info};

/// Directory names whose contents never trigger a rebuild.
const IGNORED_DIRS: &[&str] = &["target", "node_modules"];

/// Build once, then rebuild on every settled batch of changes until Ctrl-C.
///
/// Build failures are reported and watching continues. A config file that no
/// longer loads keeps the previous configuration.
pub async fn watch(orchestrator: &BuildOrchestrator, args: &BuildArgs) -> Result<()> {
  let overrides = args.overrides();
  let mut config = load(&args.config, &overrides)?;
  let config_path = config.root.join(
    args
      .config
      .file_name()
      .context("config path has no file name")?,
  );

  build_once(orchestrator, &config, args.output).await?;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
    let _ = tx.send(event);
  })
  .context("Failed to create file watcher")?;
  let mut watched = Vec::new();
  sync_watches(&mut watcher, &mut watched, &config)?;

  if !args.output.is_json() {
    let dirs: Vec<String> = watched.iter().map(|p| p.display().to_string()).collect();
    print_info(&format!("Watching {} (Ctrl-C to stop)", dirs.join(", ")));
  }

  loop {
    let first = tokio::select! {
      event = rx.recv() => event,
      _ = tokio::signal::ctrl_c() => return Ok(()),
    };
    let Some(first) = first else {
      return Ok(());
    };

    let mut changed = relevant_paths(first, &config);
    if changed.is_empty() {
      continue;
    }

    // wait for the burst to go quiet
    loop {
      match tokio::time::timeout(args.debounce, rx.recv()).await {
        Ok(Some(event)) => changed.extend(relevant_paths(event, &config)),
        Ok(None) => return Ok(()),
        Err(_) => break,
      }
    }

    debug!(paths = ?changed, "inputs changed");
    if changed.iter().any(|p| p == &config_path) {
      match load(&args.config, &overrides) {
        Ok(reloaded) => {
          config = reloaded;
          if let Err(e) = sync_watches(&mut watcher, &mut watched, &config) {
            print_error(&format!("{e:#}"));
          }
        }
        Err(e) => {
          print_error(&format!("{e:#}"));
          continue;
        }
      }
    }

    build_once(orchestrator, &config, args.output).await?;
  }
}

/// Directories to watch: the config root plus every input directory that
/// lies outside it. Directories nested in another watched one are dropped.
pub fn watch_roots(config: &BuildConfig) -> Vec<PathBuf> {
  let mut candidates = vec![config.root.clone()];
  candidates.extend(config.assets.iter().cloned());
  candidates.extend(config.entries.values().filter_map(|e| e.parent().map(Path::to_path_buf)));
  if let Some(native) = &config.native {
    candidates.push(native.crate_dir.clone());
  }
  // ancestors sort before their descendants
  candidates.sort();
  candidates.dedup();

  let mut roots: Vec<PathBuf> = Vec::new();
  for candidate in candidates {
    if !roots.iter().any(|root| candidate.starts_with(root)) {
      roots.push(candidate);
    }
  }
  roots
}

/// Bring the watcher in line with `config`. Only the config root is required;
/// other directories that cannot be watched (missing asset trees) are logged.
fn sync_watches(watcher: &mut RecommendedWatcher, watched: &mut Vec<PathBuf>, config: &BuildConfig) -> Result<()> {
  let roots = watch_roots(config);

  for stale in watched.iter().filter(|p| !roots.contains(p)) {
    if let Err(e) = watcher.unwatch(stale) {
      debug!(path = %stale.display(), error = %e, "failed to unwatch");
    }
  }
  for root in roots.iter().filter(|p| !watched.contains(p)) {
    match watcher.watch(root, RecursiveMode::Recursive) {
      Ok(()) => debug!(path = %root.display(), "watching"),
      Err(e) if root == &config.root => {
        return Err(e).with_context(|| format!("Failed to watch {}", root.display()));
      }
      Err(e) => warn!(path = %root.display(), error = %e, "cannot watch input directory"),
    }
  }

  *watched = roots;
  Ok(())
}

fn relevant_paths(event: notify::Result<Event>, config: &BuildConfig) -> Vec<PathBuf> {
  match event {
    Ok(event) if matches!(event.kind, EventKind::Access(_)) => Vec::new(),
    Ok(event) => event
      .paths
      .into_iter()
      .filter(|path| is_relevant(path, config))
      .collect(),
    Err(e) => {
      warn!(error = %e, "watch error");
      Vec::new()
    }
  }
}

/// Whether a change at `path` should trigger a rebuild. Build outputs, the
/// generated shim directory, hidden entries and dependency directories are
/// ignored.
pub fn is_relevant(path: &Path, config: &BuildConfig) -> bool {
  if path.starts_with(&config.out_dir) {
    return false;
  }
  if config.native.as_ref().is_some_and(|n| path.starts_with(&n.shim_dir)) {
    return false;
  }

  let roots = watch_roots(config);
  let rel = roots
    .iter()
    .find_map(|root| path.strip_prefix(root).ok())
    .unwrap_or(path);
  !rel.components().any(|c| match c {
    Component::Normal(name) => {
      let name = name.to_string_lossy();
      name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
    }
    _ => false,
  })
}
