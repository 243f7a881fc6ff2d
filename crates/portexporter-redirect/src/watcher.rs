//! Rebuild a redirect handler when its token or CA file changes

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RedirectEntry;
use crate::error::RedirectError;
use crate::handler::RedirectHandler;
use crate::table::RedirectTable;

/// Start watching `entry`'s files, rebuilding its handler in `table` on change
///
/// Returns `None` when the entry has no files to watch.
pub fn watch(
    entry: RedirectEntry,
    table: RedirectTable,
    shutdown: CancellationToken,
) -> Result<Option<JoinHandle<()>>, RedirectError> {
    let files: Vec<&Path> = entry.watched_files().collect();
    if files.is_empty() {
        return Ok(None);
    }

    let watch_error = |source| RedirectError::Watch {
        address: entry.address.clone(),
        source,
    };

    // One pending rebuild is enough; bursts of events coalesce
    let (tx, rx) = mpsc::channel(1);
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) if is_data_change(&event.kind) => {
                let _ = tx.try_send(());
            }
            Ok(_) => {}
            Err(e) => warn!("File watch error: {}", e),
        },
        notify::Config::default(),
    )
    .map_err(watch_error)?;

    for file in &files {
        watcher
            .watch(file, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;
    }
    debug!(address = %entry.address, files = ?files, "Watching redirect files");

    Ok(Some(tokio::spawn(rebuild_on_change(
        watcher, entry, table, rx, shutdown,
    ))))
}

fn is_data_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any)
    )
}

async fn rebuild_on_change(
    _watcher: RecommendedWatcher,
    entry: RedirectEntry,
    table: RedirectTable,
    mut changes: mpsc::Receiver<()>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = changes.recv() => if changed.is_none() {
                break;
            },
        }

        let handler = match rebuild(&entry).await {
            Ok(handler) => handler,
            Err(e) => {
                error!("Failed to rebuild redirect {}, keeping the previous handler: {}", entry, e);
                continue;
            }
        };

        match table.replace(&entry.address, handler) {
            Ok(_) => info!("Reloaded redirect {}", entry),
            Err(e) => warn!("Discarding rebuilt redirect: {}", e),
        }
    }
}

/// Build a fresh handler on the blocking pool, where token and CA files are read
async fn rebuild(entry: &RedirectEntry) -> Result<RedirectHandler, RedirectError> {
    let entry = entry.clone();
    tokio::task::spawn_blocking(move || RedirectHandler::build(&entry)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    async fn wait_for_swap(table: &RedirectTable, address: &str, before: &Arc<RedirectHandler>) -> Arc<RedirectHandler> {
        for _ in 0..250 {
            let current = table.get(address).unwrap();
            if !Arc::ptr_eq(&current, before) {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("handler for {address} was never rebuilt");
    }

    #[tokio::test]
    async fn test_token_change_swaps_handler() {
        let dir = tempfile::tempdir().unwrap();
        let token = dir.path().join("token");
        std::fs::write(&token, "one").unwrap();

        let entry = RedirectEntry {
            address: "https://svcA".to_string(),
            token_file: Some(token.clone()),
            ..Default::default()
        };
        let table = RedirectTable::load(std::slice::from_ref(&entry)).unwrap();
        let shutdown = CancellationToken::new();
        let before = table.get("https://svcA").unwrap();

        let task = watch(entry, table.clone(), shutdown.clone())
            .unwrap()
            .unwrap();

        std::fs::write(&token, "two").unwrap();
        let after = wait_for_swap(&table, "https://svcA", &before).await;

        assert_eq!(after.bearer().unwrap(), "Bearer two");
        // A request that took the old handler still has a working one
        assert_eq!(before.bearer().unwrap(), "Bearer one");

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_last_good_handler() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("ca.pem");
        let certified = rcgen::generate_simple_self_signed(vec!["svcA".to_string()]).unwrap();
        let pem = certified.cert.pem();
        std::fs::write(&ca, &pem).unwrap();

        let mut entry = RedirectEntry {
            address: "https://svcA".to_string(),
            ..Default::default()
        };
        entry.tls.ca_cert_file = Some(ca.clone());
        let table = RedirectTable::load(std::slice::from_ref(&entry)).unwrap();
        let shutdown = CancellationToken::new();
        let before = table.get("https://svcA").unwrap();

        let task = watch(entry, table.clone(), shutdown.clone())
            .unwrap()
            .unwrap();

        std::fs::write(&ca, "not a certificate").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(Arc::ptr_eq(&table.get("https://svcA").unwrap(), &before));

        // The watcher is still running and picks up the repaired file
        std::fs::write(&ca, &pem).unwrap();
        wait_for_swap(&table, "https://svcA", &before).await;

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_rebuild_reads_files_on_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        let token = dir.path().join("token");
        std::fs::write(&token, "fresh\n").unwrap();

        let mut entry = RedirectEntry {
            address: "https://svcA".to_string(),
            token_file: Some(token),
            ..Default::default()
        };
        let handler = rebuild(&entry).await.unwrap();
        assert_eq!(handler.bearer().unwrap(), "Bearer fresh");

        entry.tls.ca_cert_file = Some(dir.path().join("missing-ca.pem"));
        let err = rebuild(&entry).await.err().unwrap();
        assert!(matches!(err, RedirectError::Tls(_)), "{err}");
    }

    #[tokio::test]
    async fn test_nothing_to_watch() {
        let entry = RedirectEntry {
            address: "http://svcB".to_string(),
            ..Default::default()
        };
        let table = RedirectTable::load(std::slice::from_ref(&entry)).unwrap();
        assert!(watch(entry, table, CancellationToken::new())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_a_watch_error() {
        let entry = RedirectEntry {
            address: "https://svcA".to_string(),
            token_file: Some(PathBuf::from("/nonexistent/token")),
            ..Default::default()
        };
        let table = RedirectTable::load(std::slice::from_ref(&entry)).unwrap();

        let err = watch(entry, table, CancellationToken::new()).unwrap_err();
        assert!(matches!(err, RedirectError::Watch { .. }));
    }
}
