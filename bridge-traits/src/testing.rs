//! In-memory capability fakes for tests in downstream crates.
//!
//! Enabled with the `testing` feature.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{BridgeError, Result};
use crate::network::{NetworkChangeStream, NetworkInfo, NetworkMonitor};
use crate::storage::{FileMetadata, FileSystemAccess};
use tokio::sync::mpsc;

/// File system held in a map. Directories are implied by file paths, plus any
/// created explicitly.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    root: PathBuf,
    files: Mutex<BTreeMap<PathBuf, Bytes>>,
    dirs: Mutex<Vec<PathBuf>>,
    failing_writes: Mutex<Vec<String>>,
    writes: AtomicUsize,
}

impl MemoryFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Makes every write whose path contains `fragment` fail with an I/O error.
    pub fn fail_writes_containing(&self, fragment: impl Into<String>) {
        self.failing_writes.lock().push(fragment.into());
    }

    pub fn clear_failures(&self) {
        self.failing_writes.lock().clear();
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.files.lock().keys().cloned().collect()
    }

    pub fn contents(&self, path: &Path) -> Option<Bytes> {
        self.files.lock().get(path).cloned()
    }

    fn not_found(path: &Path) -> BridgeError {
        BridgeError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        ))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let explicit = self.dirs.lock().iter().any(|d| d.starts_with(path));
        explicit
            || self
                .files
                .lock()
                .keys()
                .any(|f| f != path && f.starts_with(path))
    }
}

#[async_trait]
impl FileSystemAccess for MemoryFileSystem {
    async fn get_cache_directory(&self) -> Result<PathBuf> {
        Ok(self.root.join("cache"))
    }

    async fn get_data_directory(&self) -> Result<PathBuf> {
        Ok(self.root.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let is_file = self.files.lock().contains_key(path);
        Ok(is_file || self.is_dir(path))
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        if let Some(data) = self.files.lock().get(path) {
            return Ok(FileMetadata {
                size: data.len() as u64,
                created_at: None,
                modified_at: None,
                is_directory: false,
            });
        }
        if self.is_dir(path) {
            return Ok(FileMetadata {
                size: 0,
                created_at: None,
                modified_at: None,
                is_directory: true,
            });
        }
        Err(Self::not_found(path))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.dirs.lock().push(path.to_path_buf());
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| Self::not_found(path))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        let display = path.to_string_lossy();
        if self
            .failing_writes
            .lock()
            .iter()
            .any(|fragment| display.contains(fragment.as_str()))
        {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("injected write failure for {}", display),
            )));
        }
        self.files.lock().insert(path.to_path_buf(), data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(path))
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        if !self.is_dir(path) {
            return Err(Self::not_found(path));
        }
        self.files.lock().retain(|f, _| !f.starts_with(path));
        self.dirs.lock().retain(|d| !d.starts_with(path));
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        if !self.is_dir(path) {
            return Err(Self::not_found(path));
        }
        let mut candidates: Vec<PathBuf> = self.files.lock().keys().cloned().collect();
        candidates.extend(self.dirs.lock().iter().cloned());
        let mut children: Vec<PathBuf> = candidates
            .iter()
            .filter_map(|p| {
                let rest = p.strip_prefix(path).ok()?;
                let first = rest.components().next()?;
                Some(path.join(first))
            })
            .collect();
        children.sort();
        children.dedup();
        Ok(children)
    }
}

/// Network monitor driven by the test through a channel.
///
/// `get_network_info` always reports the initial snapshot. The change stream
/// can be subscribed once and ends when every controller is dropped.
pub struct ChannelNetworkMonitor {
    initial: NetworkInfo,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<NetworkInfo>>>,
}

/// Sending half of a [`ChannelNetworkMonitor`].
#[derive(Clone)]
pub struct NetworkController {
    sender: mpsc::UnboundedSender<NetworkInfo>,
}

impl NetworkController {
    /// Pushes a snapshot. Returns `false` once the monitor is gone.
    pub fn send(&self, info: NetworkInfo) -> bool {
        self.sender.send(info).is_ok()
    }

    pub fn go_online(&self) -> bool {
        self.send(NetworkInfo::connected(vec![crate::network::NetworkType::WiFi]))
    }

    pub fn go_offline(&self) -> bool {
        self.send(NetworkInfo::disconnected())
    }
}

impl ChannelNetworkMonitor {
    pub fn new(initial: NetworkInfo) -> (Self, NetworkController) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                initial,
                receiver: Mutex::new(Some(receiver)),
            },
            NetworkController { sender },
        )
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<NetworkInfo>);

#[async_trait]
impl NetworkChangeStream for ChannelStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        self.0.recv().await
    }
}

#[async_trait]
impl NetworkMonitor for ChannelNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        Ok(self.initial.clone())
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        let receiver = self.receiver.lock().take().ok_or_else(|| {
            BridgeError::NotAvailable("change stream already subscribed".to_string())
        })?;
        Ok(Box::new(ChannelStream(receiver)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_fs_round_trip_and_listing() {
        let fs = MemoryFileSystem::new("/data");
        fs.write_file(Path::new("/data/a/1.json"), Bytes::from("one"))
            .await
            .unwrap();
        fs.write_file(Path::new("/data/a/b/2.json"), Bytes::from("two!"))
            .await
            .unwrap();

        assert_eq!(
            fs.read_file(Path::new("/data/a/1.json")).await.unwrap(),
            Bytes::from("one")
        );
        assert_eq!(
            fs.list_directory(Path::new("/data/a")).await.unwrap(),
            vec![PathBuf::from("/data/a/1.json"), PathBuf::from("/data/a/b")]
        );
        assert_eq!(fs.directory_size(Path::new("/data/a")).await.unwrap(), 7);

        fs.delete_dir_all(Path::new("/data/a")).await.unwrap();
        assert!(!fs.exists(Path::new("/data/a/1.json")).await.unwrap());
    }

    #[tokio::test]
    async fn test_channel_network_monitor() {
        let (monitor, controller) = ChannelNetworkMonitor::new(NetworkInfo::disconnected());
        assert!(!monitor.is_connected().await);

        let mut stream = monitor.subscribe_changes().await.unwrap();
        assert!(monitor.subscribe_changes().await.is_err());

        assert!(controller.go_online());
        assert!(stream.next().await.unwrap().interfaces.len() == 1);
        drop(controller);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let fs = MemoryFileSystem::new("/data");
        fs.fail_writes_containing("image");

        let err = fs
            .write_file(Path::new("/data/7/image.jpg"), Bytes::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));
        assert!(fs
            .read_file(Path::new("/data/7/image.jpg"))
            .await
            .unwrap_err()
            .is_not_found());
    }
}
