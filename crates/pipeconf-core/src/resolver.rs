//! Raw configuration resolvers
//!
//! A [`MapResolver`] produces the untyped configuration tree the provider
//! feeds into the processor pipeline, and reports when its sources change.
//!
//! Two resolvers are provided:
//!
//! - [`FileResolver`] merges YAML/JSON files in order and polls them for changes
//! - [`StaticResolver`] serves an in-memory tree whose change notifications are
//!   driven by the caller

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result, SourceLocation};
use crate::value::Value;

/// Capacity of the change notification channel
const CHANNEL_CAPACITY: usize = 16;

/// A notification sent to every [`ChangeStream`]
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// The sources changed; fetch the configuration again
    Changed,
    /// Monitoring failed; no further events follow
    Failed(Error),
}

/// Stream of change notifications from a resolver
#[derive(Debug)]
pub struct ChangeStream {
    rx: broadcast::Receiver<WatchEvent>,
}

impl ChangeStream {
    fn new(rx: broadcast::Receiver<WatchEvent>) -> Self {
        Self { rx }
    }

    /// A stream that has already ended
    pub fn closed() -> Self {
        let (_, rx) = broadcast::channel(1);
        Self::new(rx)
    }

    /// Wait for the next notification
    ///
    /// Returns `Some(Ok(()))` when the sources changed, `Some(Err(_))` when
    /// monitoring failed for good, and `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Result<()>> {
        match self.rx.recv().await {
            Ok(WatchEvent::Changed) => Some(Ok(())),
            Ok(WatchEvent::Failed(err)) => Some(Err(err)),
            Err(RecvError::Lagged(missed)) => {
                // Missed notifications collapse into one change
                log::debug!("Change stream lagged by {} notifications", missed);
                Some(Ok(()))
            }
            Err(RecvError::Closed) => None,
        }
    }
}

/// Source of the raw configuration tree
#[async_trait]
pub trait MapResolver: Send + Sync {
    /// Retrieve and merge the configuration sources
    async fn resolve(&self) -> Result<Value>;

    /// Subscribe to change notifications
    fn watch(&self) -> ChangeStream;

    /// Release resources; every outstanding [`ChangeStream`] ends
    async fn shutdown(&self) -> Result<()>;
}

/// Lock a mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Broadcast side shared by the resolvers
///
/// Dropping the sender ends every subscribed stream.
#[derive(Debug, Default)]
struct Notifier {
    sender: Option<broadcast::Sender<WatchEvent>>,
    closed: bool,
}

impl Notifier {
    fn subscribe(&mut self) -> ChangeStream {
        if self.closed {
            return ChangeStream::closed();
        }
        let sender = self
            .sender
            .get_or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        ChangeStream::new(sender.subscribe())
    }

    fn send(&self, event: WatchEvent) {
        if let Some(sender) = &self.sender {
            // No subscribers is not an error
            let _ = sender.send(event);
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.sender = None;
    }
}

/// A configuration file to load
///
/// Files are merged in the order given: later files override earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSpec {
    /// A file that must exist
    Required(PathBuf),
    /// A file that is skipped when missing
    Optional(PathBuf),
}

impl FileSpec {
    pub fn required(path: impl Into<PathBuf>) -> Self {
        FileSpec::Required(path.into())
    }

    pub fn optional(path: impl Into<PathBuf>) -> Self {
        FileSpec::Optional(path.into())
    }

    pub fn path(&self) -> &Path {
        match self {
            FileSpec::Required(p) | FileSpec::Optional(p) => p,
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, FileSpec::Optional(_))
    }
}

impl<P: Into<PathBuf>> From<P> for FileSpec {
    fn from(path: P) -> Self {
        FileSpec::Required(path.into())
    }
}

/// Options for [`FileResolver`]
#[derive(Debug, Clone)]
pub struct FileResolverOptions {
    /// How often files are checked for modification
    pub poll_interval: Duration,
}

impl Default for FileResolverOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

struct Poller {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Resolver merging YAML and JSON files
///
/// Mappings are merged deeply, scalars and sequences from later files replace
/// earlier ones, and a null value removes the key. Files ending in `.json`
/// are parsed as JSON, everything else as YAML.
///
/// Polling starts with the first [`watch`](MapResolver::watch). A polling
/// failure is reported once and ends every stream; later watches are closed.
pub struct FileResolver {
    specs: Vec<FileSpec>,
    options: FileResolverOptions,
    notifier: Arc<Mutex<Notifier>>,
    poller: Mutex<Option<Poller>>,
}

impl FileResolver {
    pub fn new(specs: Vec<FileSpec>) -> Self {
        Self::with_options(specs, FileResolverOptions::default())
    }

    pub fn with_options(specs: Vec<FileSpec>, options: FileResolverOptions) -> Self {
        Self {
            specs,
            options,
            notifier: Arc::new(Mutex::new(Notifier::default())),
            poller: Mutex::new(None),
        }
    }

    /// Files this resolver reads, in merge order
    pub fn specs(&self) -> &[FileSpec] {
        &self.specs
    }

    /// Spawn the polling task; the caller holds the notifier lock
    fn start_poller(&self, notifier: &mut Notifier) -> Option<Poller> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::warn!("Cannot watch configuration files: {}", e);
                notifier.send(WatchEvent::Failed(Error::watch(format!(
                    "file watching requires a tokio runtime: {}",
                    e
                ))));
                notifier.close();
                return None;
            }
        };

        let (stop, stopped) = oneshot::channel();
        let handle = runtime.spawn(poll_files(
            self.specs.clone(),
            self.options.poll_interval,
            Arc::clone(&self.notifier),
            stopped,
        ));
        Some(Poller { stop, handle })
    }
}

#[async_trait]
impl MapResolver for FileResolver {
    async fn resolve(&self) -> Result<Value> {
        let mut merged: Option<Value> = None;
        for spec in &self.specs {
            let path = spec.path();
            let content = match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if spec.is_optional() {
                        log::debug!("Skipping missing optional file {}", path.display());
                        continue;
                    }
                    return Err(Error::file_not_found(path.display().to_string()));
                }
                Err(e) => return Err(Error::io(path.display().to_string(), e.to_string())),
            };

            let value = parse_file(path, &content)?;
            match &mut merged {
                Some(base) => base.merge(value),
                None => merged = Some(value),
            }
        }
        Ok(merged.unwrap_or_else(Value::mapping))
    }

    fn watch(&self) -> ChangeStream {
        let mut notifier = lock(&self.notifier);
        let stream = notifier.subscribe();
        if notifier.closed {
            return stream;
        }

        let mut poller = lock(&self.poller);
        if poller.is_none() {
            *poller = self.start_poller(&mut notifier);
        }
        stream
    }

    async fn shutdown(&self) -> Result<()> {
        lock(&self.notifier).close();
        let poller = lock(&self.poller).take();

        if let Some(Poller { stop, handle }) = poller {
            let _ = stop.send(());
            handle
                .await
                .map_err(|e| Error::shutdown(format!("file watcher task failed: {}", e)))?;
        }
        log::debug!("File resolver shut down");
        Ok(())
    }
}

/// Parse one file's content, keeping the line of any syntax error
fn parse_file(path: &Path, content: &str) -> Result<Value> {
    let file = path.display().to_string();
    if content.trim().is_empty() {
        return Ok(Value::mapping());
    }

    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(content).map_err(|e| {
            Error::parse(e.to_string()).with_source_location(SourceLocation {
                file,
                line: Some(e.line()),
                column: Some(e.column()),
            })
        })
    } else {
        serde_yaml::from_str(content).map_err(|e| {
            let location = e.location();
            Error::parse(e.to_string()).with_source_location(SourceLocation {
                file,
                line: location.as_ref().map(|l| l.line()),
                column: location.as_ref().map(|l| l.column()),
            })
        })
    }
}

/// Modification time and size of each file, `None` when missing
type Fingerprint = Vec<Option<(SystemTime, u64)>>;

async fn fingerprint(specs: &[FileSpec]) -> Result<Fingerprint> {
    let mut prints = Vec::with_capacity(specs.len());
    for spec in specs {
        match tokio::fs::metadata(spec.path()).await {
            Ok(meta) => {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                prints.push(Some((modified, meta.len())));
            }
            Err(_) if spec.is_optional() => prints.push(None),
            Err(e) => {
                return Err(Error::watch(format!(
                    "cannot read {}: {}",
                    spec.path().display(),
                    e
                )))
            }
        }
    }
    Ok(prints)
}

/// Report a polling failure and end every stream
fn poll_failed(notifier: &Mutex<Notifier>, err: Error) {
    log::warn!("{}", err);
    let mut notifier = lock(notifier);
    notifier.send(WatchEvent::Failed(err));
    notifier.close();
}

async fn poll_files(
    specs: Vec<FileSpec>,
    poll_interval: Duration,
    notifier: Arc<Mutex<Notifier>>,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut last = match fingerprint(&specs).await {
        Ok(print) => print,
        Err(e) => {
            poll_failed(&notifier, e);
            return;
        }
    };

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut stopped => break,
            _ = ticker.tick() => {
                match fingerprint(&specs).await {
                    Ok(current) if current != last => {
                        log::debug!("Configuration files changed");
                        last = current;
                        lock(&notifier).send(WatchEvent::Changed);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        poll_failed(&notifier, e);
                        break;
                    }
                }
            }
        }
    }
    log::trace!("File poller stopped");
}

/// Resolver serving an in-memory tree
///
/// Changes are announced explicitly with [`notify_changed`](Self::notify_changed)
/// after [`set`](Self::set), which makes it handy for tests and for embedders
/// that assemble the configuration themselves.
#[derive(Debug, Default)]
pub struct StaticResolver {
    tree: Mutex<Value>,
    notifier: Mutex<Notifier>,
}

impl StaticResolver {
    pub fn new(tree: Value) -> Self {
        Self {
            tree: Mutex::new(tree),
            notifier: Mutex::new(Notifier::default()),
        }
    }

    /// Parse the tree from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let tree: Value = serde_yaml::from_str(yaml).map_err(|e| Error::parse(e.to_string()))?;
        Ok(Self::new(tree))
    }

    /// Replace the tree returned by later resolutions
    pub fn set(&self, tree: Value) {
        *lock(&self.tree) = tree;
    }

    /// Tell every watcher the tree changed
    pub fn notify_changed(&self) {
        lock(&self.notifier).send(WatchEvent::Changed);
    }

    /// Report a terminal monitoring failure and end every stream
    pub fn fail(&self, err: Error) {
        let mut notifier = lock(&self.notifier);
        notifier.send(WatchEvent::Failed(err));
        notifier.close();
    }
}

#[async_trait]
impl MapResolver for StaticResolver {
    async fn resolve(&self) -> Result<Value> {
        Ok(lock(&self.tree).clone())
    }

    fn watch(&self) -> ChangeStream {
        lock(&self.notifier).subscribe()
    }

    async fn shutdown(&self) -> Result<()> {
        lock(&self.notifier).close();
        Ok(())
    }
}
