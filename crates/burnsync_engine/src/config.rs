//! Configuration for the sync engine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default attempt budget before a timed-out delivery is reported as failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default name of the script API definition file.
pub const DEFAULT_DEFINITION_FILE: &str = "NetScriptDefinition.d.ts";

/// How source maps produced by the pipeline are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourcemapMode {
    /// Source maps are discarded.
    #[default]
    Off,
    /// Source map is embedded as a base64 data URL comment.
    Inline,
    /// Source map is pushed as `<filename>.map` and referenced by a comment.
    Separate,
    /// Source map is pushed as `<filename>.map` without a reference comment.
    Hidden,
}

/// Maps a remote file on a server to a local path. `None` skips the file.
pub type LocationFn = Arc<dyn Fn(&str, &str) -> Option<PathBuf> + Send + Sync>;

/// Joins a remote filename under `base`.
///
/// Leading slashes are dropped. Returns `None` for empty names and for names
/// with a `..` segment, using either separator.
pub fn remote_path(base: &Path, filename: &str) -> Option<PathBuf> {
    let relative = filename.trim_start_matches(['/', '\\']);
    let climbs = relative.split(['/', '\\']).any(|segment| segment == "..");
    if relative.is_empty() || climbs {
        return None;
    }
    Some(base.join(relative))
}

/// Filters applied to remote files before they are downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IgnoreRules {
    /// Skip TypeScript files, including generated `.d.ts` definitions.
    pub ignore_ts: bool,
    /// Skip source maps.
    pub ignore_sourcemap: bool,
}

impl IgnoreRules {
    /// Returns true if `filename` should not be downloaded.
    pub fn is_ignored(&self, filename: &str) -> bool {
        (self.ignore_ts && filename.ends_with(".ts"))
            || (self.ignore_sourcemap && filename.ends_with(".map"))
    }
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            ignore_ts: true,
            ignore_sourcemap: true,
        }
    }
}

/// Configuration for the download-all command.
#[derive(Clone)]
pub struct DownloadConfig {
    /// Servers to download from.
    pub servers: Vec<String>,
    /// Filters applied to remote filenames.
    pub ignore: IgnoreRules,
    /// Directory downloads must stay inside.
    pub root: PathBuf,
    /// Local destination for a `(filename, server)` pair.
    pub location: LocationFn,
}

impl DownloadConfig {
    /// Creates a config downloading `home` into `<root>/src/`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let src = root.join("src");
        Self {
            servers: vec!["home".into()],
            ignore: IgnoreRules::default(),
            root,
            location: Arc::new(move |file: &str, _server: &str| remote_path(&src, file)),
        }
    }

    /// Sets the servers to download from.
    pub fn with_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the ignore rules.
    pub fn with_ignore(mut self, ignore: IgnoreRules) -> Self {
        self.ignore = ignore;
        self
    }

    /// Sets the location function.
    pub fn with_location<F>(mut self, location: F) -> Self
    where
        F: Fn(&str, &str) -> Option<PathBuf> + Send + Sync + 'static,
    {
        self.location = Arc::new(location);
        self
    }

    /// Resolves the local path for a remote file.
    pub fn local_path(&self, filename: &str, server: &str) -> Option<PathBuf> {
        (self.location)(filename, server)
    }
}

impl fmt::Debug for DownloadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadConfig")
            .field("servers", &self.servers)
            .field("ignore", &self.ignore)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Listen port reported in status.
    pub port: u16,
    /// Timed-out attempts before a delivery is reported as failed.
    pub max_attempts: u32,
    /// Drop notifications from the pipeline's startup pass.
    pub ignore_initial: bool,
    /// Source map delivery mode.
    pub sourcemap: SourcemapMode,
    /// Local path for the script API definition file.
    pub definition_file: Option<PathBuf>,
    /// Download-all settings.
    pub download: DownloadConfig,
    /// Directory receiving a copy of every built file as it is enqueued.
    pub dump_files: Option<PathBuf>,
}

impl EngineConfig {
    /// Creates a configuration rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            port: 12525,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            ignore_initial: false,
            sourcemap: SourcemapMode::Off,
            definition_file: Some(root.join(DEFAULT_DEFINITION_FILE)),
            download: DownloadConfig::new(root),
            dump_files: None,
        }
    }

    /// Sets the port reported in status.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the attempt budget. Zero is treated as one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Drops startup-pass notifications.
    pub fn with_ignore_initial(mut self, ignore_initial: bool) -> Self {
        self.ignore_initial = ignore_initial;
        self
    }

    /// Sets the source map mode.
    pub fn with_sourcemap(mut self, mode: SourcemapMode) -> Self {
        self.sourcemap = mode;
        self
    }

    /// Sets or disables the definition file path.
    pub fn with_definition_file(mut self, path: Option<PathBuf>) -> Self {
        self.definition_file = path;
        self
    }

    /// Sets the download configuration.
    pub fn with_download(mut self, download: DownloadConfig) -> Self {
        self.download = download;
        self
    }

    /// Sets or disables the dump directory.
    pub fn with_dump_files(mut self, dir: Option<PathBuf>) -> Self {
        self.dump_files = dir;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(".")
    }
}
