//! Site profile configuration.
//!
//! A profile is a TOML document at `<etc>/<name>/config.toml` describing
//! one site: where to fetch its database and files from, how to rewrite
//! URLs for the local environment, and which tools to run. Profiles are
//! immutable for the duration of a run.
//!
//! # Profile Structure
//!
//! ```text
//! Config
//! ├── site: SiteConfig              # display metadata
//! ├── source: SourceConfig          # remote endpoint + source DB
//! ├── destination: DestConfig       # local endpoint + local DB + tool paths
//! ├── database: DatabaseConfig      # dump/import options
//! ├── replace: Vec<ReplacePair>     # ordered find/replace pairs
//! ├── sync: Vec<SyncPair>           # ordered src → dst directory pairs
//! ├── transport: TransportConfig    # rsync | lftp settings
//! ├── hooks: HooksConfig            # hook script root
//! └── logging: LoggingConfig        # run-log file path
//! ```
//!
//! # TOML Example
//!
//! ```toml
//! [site]
//! name = "Example blog"
//!
//! [source]
//! server = "example.com"
//! user = "deploy"
//! type = "remote-dump"
//! db_name = "blog"
//! db_user = "blog"
//! db_password = "secret"
//!
//! [destination]
//! db_name = "blog_dev"
//! files_root = "/srv/www/blog"
//!
//! [[replace]]
//! search = "http://example.com"
//! replace = "http://blog.local.test"
//!
//! [[sync]]
//! src = "/var/www/blog/wp-content/uploads"
//! dst = "/srv/www/blog/wp-content/uploads"
//! ```

use crate::error::{Result, SyncError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

/// Where the SQL dump comes from in phase 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    /// Run the dump binary on the remote host over the remote shell.
    #[default]
    RemoteDump,
    /// Run the dump binary locally against the source database.
    LocalDump,
    /// Copy an existing dump file from the remote host.
    RemoteFile,
    /// Copy an existing dump file from the local filesystem.
    LocalFile,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::RemoteDump => write!(f, "remote-dump"),
            SourceType::LocalDump => write!(f, "local-dump"),
            SourceType::RemoteFile => write!(f, "remote-file"),
            SourceType::LocalFile => write!(f, "local-file"),
        }
    }
}

/// How files are transferred in phase 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransportType {
    #[default]
    Rsync,
    Lftp,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Rsync => write!(f, "rsync"),
            TransportType::Lftp => write!(f, "lftp"),
        }
    }
}

/// Top-level structure for a site profile.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub source: SourceConfig,
    pub destination: DestConfig,
    pub database: DatabaseConfig,
    pub replace: Vec<ReplacePair>,
    pub sync: Vec<SyncPair>,
    pub transport: TransportConfig,
    pub hooks: HooksConfig,
    pub logging: LoggingConfig,

    /// Set by the loader; not part of the document.
    #[serde(skip)]
    profile_path: PathBuf,
}

/// Display metadata for the site.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SiteConfig {
    pub name: String,
    pub description: String,
}

/// Settings for the remote (source) side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    // Connection
    pub server: String,
    pub user: String,
    pub port: u16,

    /// Dump source type; see [`SourceType`].
    #[serde(rename = "type")]
    pub kind: SourceType,
    /// Existing dump file path, for the `*-file` source types.
    pub file: String,
    /// Advisory only: the import phase detects gzip from the file name.
    pub compress: bool,

    // Source DB credentials
    pub db_hostname: String,
    pub db_port: String,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,

    // Site URL helpers
    pub site_protocol: String,
    pub site_host: String,
    pub site_slug: String,
    pub files_root: String,

    // Remote tool settings
    pub path_to_mysqldump: String,
    /// Optional prefix for the remote dump command (e.g. `nice -n19`).
    pub remote_nice: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            user: String::new(),
            port: 22,
            kind: SourceType::RemoteDump,
            file: String::new(),
            compress: true,
            db_hostname: "localhost".to_string(),
            db_port: String::new(),
            db_name: String::new(),
            db_user: String::new(),
            db_password: String::new(),
            site_protocol: "http://".to_string(),
            site_host: String::new(),
            site_slug: String::new(),
            files_root: String::new(),
            path_to_mysqldump: "mysqldump".to_string(),
            remote_nice: String::new(),
        }
    }
}

/// Settings for the local (destination) side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestConfig {
    // Site URL helpers
    pub site_protocol: String,
    pub site_host: String,
    pub site_slug: String,
    pub files_root: String,

    // Destination DB credentials
    pub db_hostname: String,
    pub db_port: String,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,

    // Local tool paths
    pub path_to_mysql: String,
    pub path_to_mysqldump: String,
    pub path_to_rsync: String,
    pub path_to_lftp: String,
    pub local_nice: String,
}

impl Default for DestConfig {
    fn default() -> Self {
        Self {
            site_protocol: "http://".to_string(),
            site_host: String::new(),
            site_slug: String::new(),
            files_root: String::new(),
            db_hostname: "localhost".to_string(),
            db_port: String::new(),
            db_name: String::new(),
            db_user: String::new(),
            db_password: String::new(),
            path_to_mysql: "mysql".to_string(),
            path_to_mysqldump: "mysqldump".to_string(),
            path_to_rsync: "rsync".to_string(),
            path_to_lftp: "lftp".to_string(),
            local_nice: String::new(),
        }
    }
}

/// Dump / import options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub sql_options_structure: String,
    pub sql_options_extra: String,
    pub ignore_tables: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sql_options_structure: "--default-character-set=utf8".to_string(),
            sql_options_extra: String::new(),
            ignore_tables: Vec::new(),
        }
    }
}

/// One find/replace entry applied to the SQL dump in phase 2.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReplacePair {
    pub search: String,
    pub replace: String,
}

/// One source → destination directory pair for phase 6.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncPair {
    pub src: String,
    pub dst: String,
}

/// File transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    #[serde(rename = "type")]
    pub kind: TransportType,
    pub rsync_options: String,
    pub exclude: Vec<String>,
    pub lftp: LftpConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportType::Rsync,
            rsync_options: "-uvrpztl".to_string(),
            exclude: vec![
                "/sitesync/".to_string(),
                ".git/".to_string(),
                ".svn/".to_string(),
                ".DS_Store".to_string(),
            ],
            lftp: LftpConfig::default(),
        }
    }
}

/// lftp-specific transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LftpConfig {
    pub password: String,
    pub port: u16,
    pub connect_options: String,
    pub mirror_options: String,
}

impl Default for LftpConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            port: 21,
            connect_options: String::new(),
            mirror_options: "--parallel=16 --verbose --only-newer".to_string(),
        }
    }
}

/// Where hook scripts live, relative to the profile directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub path: String,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            path: "hook".to_string(),
        }
    }
}

/// Run-log file path, relative to the project root (parent of `etc/`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: "log/sitesync.log".to_string(),
        }
    }
}

/// A discovered profile in the `etc/` directory.
#[derive(Debug, Clone)]
pub struct ProfileEntry {
    pub name: String,
    /// Absolute path to `config.toml`.
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
}

/// Path to the `etc/` directory holding the profiles.
///
/// Resolution order:
/// 1. `$SITESYNC_ETC` (explicit override, recommended for global installs)
/// 2. Walk up from the current working directory looking for an `etc/`
///    sibling, stopping before the filesystem root so the system `/etc`
///    is never matched
/// 3. Fall back to `./etc`
pub fn etc_dir() -> PathBuf {
    if let Ok(v) = std::env::var("SITESYNC_ETC") {
        if !v.is_empty() {
            return PathBuf::from(v);
        }
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut dir = cwd.clone();
    loop {
        let Some(parent) = dir.parent().map(Path::to_path_buf) else {
            break;
        };
        let candidate = dir.join("etc");
        if candidate.is_dir() {
            return candidate;
        }
        dir = parent;
    }

    cwd.join("etc")
}

/// Path to the temp directory holding transient dump artifacts.
pub fn tmp_dir() -> PathBuf {
    etc_dir().join("tmp")
}

/// All named profiles found under `etc/`, sorted by name.
/// Each named profile lives at `etc/{name}/config.toml`.
pub fn list_profiles() -> Result<Vec<ProfileEntry>> {
    let base = etc_dir();
    let entries = match std::fs::read_dir(&base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SyncError::io("reading", base, e)),
    };

    let mut profiles = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path().join("config.toml");
        let Ok(meta) = std::fs::metadata(&path) else {
            continue; // not a profile directory
        };
        profiles.push(ProfileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            modified: meta.modified().ok(),
        });
    }
    profiles.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(profiles)
}

impl Config {
    /// Load the named profile from `etc/{name}/config.toml`.
    pub fn load(name: &str) -> Result<Self> {
        Self::load_from_path(etc_dir().join(name).join("config.toml"))
    }

    /// Load a profile from an explicit file path.
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| SyncError::Config(format!("loading {}: {}", path.display(), e)))?;
        let mut cfg: Config = toml::from_str(&text)
            .map_err(|e| SyncError::Config(format!("loading {}: {}", path.display(), e)))?;
        cfg.profile_path = path;
        cfg.resolve_variables();
        Ok(cfg)
    }

    /// The path this profile was loaded from.
    pub fn profile_path(&self) -> &Path {
        &self.profile_path
    }

    /// The directory containing the profile file.
    pub fn profile_dir(&self) -> PathBuf {
        self.profile_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// The profile's name, derived from its directory.
    pub fn profile_name(&self) -> String {
        self.profile_dir()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string())
    }

    /// Absolute path to the hook directory for a given phase directory
    /// name (`before`, `between`, `after`).
    pub fn hook_dir(&self, phase: &str) -> PathBuf {
        let base = PathBuf::from(&self.hooks.path);
        let base = if base.is_absolute() {
            base
        } else {
            self.profile_dir().join(base)
        };
        base.join(phase)
    }

    /// Absolute path to the run-log file, resolved against the project
    /// root (the parent of `etc/`) when relative.
    pub fn log_file(&self) -> PathBuf {
        let lf = if self.logging.file.is_empty() {
            "log/sitesync.log"
        } else {
            self.logging.file.as_str()
        };
        let lf = PathBuf::from(lf);
        if lf.is_absolute() {
            return lf;
        }
        let etc = etc_dir();
        let root = etc.parent().map(Path::to_path_buf).unwrap_or(etc);
        root.join(lf)
    }

    /// Expected path for the transient SQL dump artifact.
    pub fn dump_file_path(&self, tmp: &Path) -> PathBuf {
        tmp.join(format!("{}.sql", self.profile_name()))
    }

    /// Replace `$var` / `${var}` references in replace and sync pairs with
    /// actual values from the profile. Safety net for profiles migrated
    /// from the old shell format that still contain literal variable names.
    fn resolve_variables(&mut self) {
        static VAR_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\$\{?([a-zA-Z_][a-zA-Z0-9_]*)\}?").unwrap());

        let vars: Vec<(&str, &str)> = vec![
            ("src_site_protocol", &self.source.site_protocol),
            ("src_site_host", &self.source.site_host),
            ("src_site_site", &self.source.site_host), // common alias
            ("src_site_slug", &self.source.site_slug),
            ("src_files_root", &self.source.files_root),
            ("src_dbuser", &self.source.db_user),
            ("src_dbhostname", &self.source.db_hostname),
            ("src_dbname", &self.source.db_name),
            ("src_server", &self.source.server),
            ("dst_site_protocol", &self.destination.site_protocol),
            ("dst_site_host", &self.destination.site_host),
            ("dst_site_slug", &self.destination.site_slug),
            ("dst_files_root", &self.destination.files_root),
            ("dst_dbuser", &self.destination.db_user),
            ("dst_dbhostname", &self.destination.db_hostname),
            ("dst_dbname", &self.destination.db_name),
        ];

        let resolve = |s: &str| -> String {
            if !s.contains('$') {
                return s.to_string();
            }
            VAR_RE
                .replace_all(s, |caps: &regex::Captures| {
                    let name = &caps[1];
                    for (var, val) in &vars {
                        if *var == name && !val.is_empty() {
                            return (*val).to_string();
                        }
                    }
                    caps[0].to_string()
                })
                .into_owned()
        };

        let replace: Vec<ReplacePair> = self
            .replace
            .iter()
            .map(|p| ReplacePair {
                search: resolve(&p.search),
                replace: resolve(&p.replace),
            })
            .collect();
        let sync: Vec<SyncPair> = self
            .sync
            .iter()
            .map(|p| SyncPair {
                src: resolve(&p.src),
                dst: resolve(&p.dst),
            })
            .collect();
        self.replace = replace;
        self.sync = sync;
    }

    #[cfg(test)]
    pub(crate) fn for_testing(profile_path: impl Into<PathBuf>) -> Self {
        Self {
            profile_path: profile_path.into(),
            ..Default::default()
        }
    }
}
