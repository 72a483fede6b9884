//! Local copies of built files, written as they are enqueued.
//!
//! Each payload lands at `<dir>/<server>/<filename>`. Batches are written in
//! the order they were enqueued, so the newest revision of a file is the one
//! left on disk.

use crate::config::remote_path;
use crate::download::{is_within, write_file};
use crate::types::{DeliveryKey, Payload};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Payloads enqueued by one adapter call.
pub(crate) type DumpBatch = Vec<(DeliveryKey, Payload)>;

/// Local path for a dumped payload. `None` if the name would leave `dir`.
pub fn dump_path(dir: &Path, key: &DeliveryKey) -> Option<PathBuf> {
    if key.server.is_empty() || key.server.contains(['/', '\\']) || key.server == ".." {
        return None;
    }
    let path = remote_path(&dir.join(&key.server), &key.filename)?;
    is_within(&path, dir).then_some(path)
}

/// Writes one batch, logging and skipping files that cannot be written.
///
/// Returns the number of files written.
pub(crate) async fn write_batch(dir: &Path, batch: &[(DeliveryKey, Payload)]) -> usize {
    let mut written = 0;
    for (key, payload) in batch {
        let Some(path) = dump_path(dir, key) else {
            warn!(%key, "dump path escapes the dump directory, skipped");
            continue;
        };
        match write_file(&path, &payload.content).await {
            Ok(()) => {
                debug!(%key, path = %path.display(), "payload dumped");
                written += 1;
            }
            Err(e) => warn!(%key, path = %path.display(), error = %e, "failed to dump payload"),
        }
    }
    written
}

/// Spawns the writer task. It stops once the sender is dropped and every
/// queued batch is written.
pub(crate) fn spawn_writer(dir: PathBuf) -> (mpsc::UnboundedSender<DumpBatch>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<DumpBatch>();
    let task = tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            write_batch(&dir, &batch).await;
        }
    });
    (tx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn dump_paths() {
        let dir = Path::new("/dump");
        assert_eq!(
            dump_path(dir, &DeliveryKey::new("home", "/lib/a.js")),
            Some(PathBuf::from("/dump/home/lib/a.js"))
        );
        assert_eq!(dump_path(dir, &DeliveryKey::new("home", "../../a.js")), None);
        assert_eq!(dump_path(dir, &DeliveryKey::new("..", "a.js")), None);
        assert_eq!(dump_path(dir, &DeliveryKey::new("a/b", "a.js")), None);
    }

    #[tokio::test]
    async fn writer_keeps_enqueue_order() {
        let dir = TempDir::new().unwrap();
        let (tx, task) = spawn_writer(dir.path().to_path_buf());
        tx.send(vec![(DeliveryKey::new("home", "a.js"), Payload::script("1"))])
            .unwrap();
        tx.send(vec![
            (DeliveryKey::new("home", "a.js"), Payload::script("2")),
            (DeliveryKey::new("n00dles", "/b.js"), Payload::script("b")),
        ])
        .unwrap();
        drop(tx);
        task.await.unwrap();

        let home = dir.path().join("home").join("a.js");
        assert_eq!(std::fs::read_to_string(home).unwrap(), "2");
        let other = dir.path().join("n00dles").join("b.js");
        assert_eq!(std::fs::read_to_string(other).unwrap(), "b");
    }
}
