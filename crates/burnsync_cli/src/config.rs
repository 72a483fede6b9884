//! Config file loading and default merging.
//!
//! The config file is JSON with camelCase keys. Every key is optional;
//! command-line flags override the file.

use crate::error::CliError;
use burnsync_engine::{
    remote_path, DownloadConfig, EngineConfig, IgnoreRules, SourcemapMode,
    DEFAULT_DEFINITION_FILE,
};
use burnsync_server::DEFAULT_PORT;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "burnsync.json";

/// Default acknowledgment timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Server used when a watch rule names none.
pub const DEFAULT_SERVER: &str = "home";

/// Raw contents of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfig {
    /// Watch rules, first match wins. Nothing is watched without rules.
    pub watch: Vec<WatchRule>,
    /// `false`, `true` (separate `.map` files), `"inline"` or `"hidden"`.
    pub sourcemap: Option<Toggle>,
    /// Listen port.
    pub port: Option<u16>,
    /// Acknowledgment timeout in milliseconds.
    pub timeout: Option<u64>,
    /// Definition file path, or `false` to skip fetching it.
    pub dts: Option<Toggle>,
    /// Drop notifications from the startup scan.
    pub ignore_initial: Option<bool>,
    /// Download settings.
    pub download: Option<DownloadSection>,
    /// Project root, relative to the config file.
    pub cwd: Option<PathBuf>,
    /// Directory receiving a copy of every built file, relative to the
    /// project root.
    pub dump_files: Option<PathBuf>,
}

/// A boolean or a string value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Toggle {
    /// Plain on/off.
    Flag(bool),
    /// A named value.
    Value(String),
}

/// One watch rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatchRule {
    /// Glob matched against source paths relative to the project root.
    pub pattern: String,
    /// Where matching files are pushed. Defaults to `home`.
    #[serde(default)]
    pub location: Option<Location>,
}

impl WatchRule {
    /// Creates a rule pushing to the default location.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            location: None,
        }
    }
}

/// Push destination of a watch rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Location {
    /// A server name; the filename is derived from the source path.
    Server(String),
    /// Several targets.
    Many(Vec<LocationItem>),
    /// A single target.
    Target(TargetSpec),
}

/// One entry of a location list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LocationItem {
    /// A server name.
    Server(String),
    /// A target.
    Target(TargetSpec),
}

/// An explicit push target.
///
/// `filename` may contain `{file}`, replaced by the derived remote filename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TargetSpec {
    /// Remote filename template.
    #[serde(default)]
    pub filename: Option<String>,
    /// Destination server.
    #[serde(default)]
    pub server: Option<String>,
}

/// Servers to download from: one name or a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ServerList {
    /// A single server.
    One(String),
    /// Several servers.
    Many(Vec<String>),
}

/// `download` section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadSection {
    /// Servers to download from. Defaults to `home`.
    pub server: Option<ServerList>,
    /// Local directory, relative to the project root. Defaults to `src/`.
    pub location: Option<PathBuf>,
    /// Skip `.ts` files. Defaults to true.
    pub ignore_ts: Option<bool>,
    /// Skip `.map` files. Defaults to true.
    pub ignore_sourcemap: Option<bool>,
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--port`.
    pub port: Option<u16>,
    /// `--timeout`, in milliseconds.
    pub timeout: Option<u64>,
    /// `--cwd`.
    pub cwd: Option<PathBuf>,
}

/// Fully merged settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project root.
    pub root: PathBuf,
    /// Listen port.
    pub port: u16,
    /// Acknowledgment timeout.
    pub timeout: Duration,
    /// Watch rules.
    pub watch: Vec<WatchRule>,
    /// Engine configuration.
    pub engine: EngineConfig,
}

impl FileConfig {
    /// Reads a config file.
    ///
    /// A missing file yields the defaults unless `required` is set.
    pub fn load(path: &Path, required: bool) -> Result<Self, CliError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(CliError::ConfigRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&text).map_err(|source| CliError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses config file text.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Merges the file with command-line overrides and defaults.
    ///
    /// `base` is the directory the config file was found in.
    pub fn into_settings(self, base: &Path, overrides: &Overrides) -> Result<Settings, CliError> {
        let root = match (&overrides.cwd, &self.cwd) {
            (Some(cwd), _) => cwd.clone(),
            (None, Some(cwd)) => base.join(cwd),
            (None, None) => base.to_path_buf(),
        };

        let port = overrides.port.or(self.port).unwrap_or(DEFAULT_PORT);
        let timeout_ms = overrides
            .timeout
            .or(self.timeout)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(CliError::InvalidConfig("timeout must be positive".into()));
        }

        let sourcemap = match self.sourcemap {
            None | Some(Toggle::Flag(false)) => SourcemapMode::Off,
            Some(Toggle::Flag(true)) => SourcemapMode::Separate,
            Some(Toggle::Value(mode)) => match mode.as_str() {
                "inline" => SourcemapMode::Inline,
                "hidden" => SourcemapMode::Hidden,
                other => {
                    return Err(CliError::InvalidConfig(format!(
                        "unknown sourcemap mode: {other}"
                    )))
                }
            },
        };

        let definition_file = match self.dts {
            None | Some(Toggle::Flag(true)) => Some(root.join(DEFAULT_DEFINITION_FILE)),
            Some(Toggle::Flag(false)) => None,
            Some(Toggle::Value(path)) => Some(root.join(path)),
        };

        let download = download_config(&root, self.download.unwrap_or_default());
        let engine = EngineConfig::new(&root)
            .with_port(port)
            .with_ignore_initial(self.ignore_initial.unwrap_or(false))
            .with_sourcemap(sourcemap)
            .with_definition_file(definition_file)
            .with_download(download)
            .with_dump_files(self.dump_files.map(|dir| root.join(dir)));

        Ok(Settings {
            root,
            port,
            timeout: Duration::from_millis(timeout_ms),
            watch: self.watch,
            engine,
        })
    }
}

fn download_config(root: &Path, section: DownloadSection) -> DownloadConfig {
    let servers = match section.server {
        None => vec![DEFAULT_SERVER.to_string()],
        Some(ServerList::One(server)) => vec![server],
        Some(ServerList::Many(servers)) => servers,
    };
    let dir = root.join(section.location.unwrap_or_else(|| PathBuf::from("src")));
    let ignore = IgnoreRules {
        ignore_ts: section.ignore_ts.unwrap_or(true),
        ignore_sourcemap: section.ignore_sourcemap.unwrap_or(true),
    };

    DownloadConfig::new(root)
        .with_servers(servers)
        .with_ignore(ignore)
        .with_location(move |file, _server| remote_path(&dir, file))
}
