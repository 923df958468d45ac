//! Configuration structures for the otf-reader.
//!
//! This module provides two layers:
//!
//! - [`ReaderSettings`] - raw, unvalidated settings as they arrive from flags,
//!   environment variables or a JSON config file. Doubles as a builder.
//! - [`ReaderConfig`] - the immutable, validated configuration produced by
//!   [`ReaderSettings::build`]. A reader can only be constructed from one.
//!
//! # Examples
//!
//! ```no_run
//! use otf_core::{InputFormat, ReaderSettings};
//!
//! let config = ReaderSettings::new()
//!     .input_format("json")
//!     .topic("otf.raw")
//!     .folder("./in")
//!     .build()?;
//!
//! assert_eq!(config.input_format(), InputFormat::Json);
//! assert_eq!(config.concurrent_files(), 10);
//! # Ok::<(), otf_core::ConfigErrors>(())
//! ```

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::envelope::Meta;
use crate::error::{ConfigError, ConfigErrors};
use crate::ident::{generate_id, generate_name, is_valid_topic};

/// Default broker host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default broker port.
pub const DEFAULT_PORT: u16 = 4222;

/// Default broker cluster id.
pub const DEFAULT_CLUSTER: &str = "test-cluster";

/// Provider name used when none is configured.
pub const DEFAULT_PROVIDER: &str = "unspecified";

/// Default number of files processed concurrently.
pub const DEFAULT_CONCURRENT_FILES: usize = 10;

/// Default watch poll interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Matches `raw` (case-insensitively) against a fixed set of choices.
fn parse_choice<T: Copy>(
    option: &'static str,
    raw: &str,
    choices: &[(&str, T)],
    expected: &'static str,
) -> Result<T, ConfigError> {
    let lowered = raw.trim().to_ascii_lowercase();
    choices
        .iter()
        .find(|(name, _)| *name == lowered)
        .map(|(_, value)| *value)
        .ok_or_else(|| ConfigError::Unsupported {
            option,
            value: raw.to_owned(),
            expected,
        })
}

/// The format of files dropped into the watch folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    /// Tabular data with a header row, converted to a JSON array first.
    Csv,
    /// A JSON array of records.
    Json,
}

impl InputFormat {
    /// Returns the lowercase tag carried in envelope metadata.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl FromStr for InputFormat {
    type Err = ConfigError;

    /// Parses `csv` or `json`, ignoring case and surrounding dots (`.CSV`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_choice(
            "input format",
            s.trim().trim_matches('.'),
            &[("csv", Self::Csv), ("json", Self::Json)],
            "csv|json",
        )
        .map_err(|err| match err {
            ConfigError::Unsupported {
                option, expected, ..
            } => ConfigError::Unsupported {
                option,
                value: s.to_owned(),
                expected,
            },
            other => other,
        })
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How input data is aligned to the common progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignMethod {
    /// The input data specifies its own alignment.
    Prescribed,
    /// An external alignment mapping is applied.
    Mapped,
    /// Alignment is inferred by a downstream classifier.
    Inferred,
}

impl AlignMethod {
    /// Returns the lowercase tag carried in envelope metadata.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prescribed => "prescribed",
            Self::Mapped => "mapped",
            Self::Inferred => "inferred",
        }
    }
}

impl FromStr for AlignMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_choice(
            "align method",
            s,
            &[
                ("prescribed", Self::Prescribed),
                ("mapped", Self::Mapped),
                ("inferred", Self::Inferred),
            ],
            "prescribed|mapped|inferred",
        )
    }
}

/// How input data is levelled onto a common scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelMethod {
    /// The input data specifies its own level.
    Prescribed,
    /// An external scale is applied.
    Mapped,
    /// Aggregation rules decide the level.
    Rules,
}

impl LevelMethod {
    /// Returns the lowercase tag carried in envelope metadata.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prescribed => "prescribed",
            Self::Mapped => "mapped",
            Self::Rules => "rules",
        }
    }
}

impl FromStr for LevelMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_choice(
            "level method",
            s,
            &[
                ("prescribed", Self::Prescribed),
                ("mapped", Self::Mapped),
                ("rules", Self::Rules),
            ],
            "prescribed|mapped|rules",
        )
    }
}

/// General capability the data relates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Literacy.
    Literacy,
    /// Numeracy.
    Numeracy,
}

impl Capability {
    /// Returns the lowercase tag carried in envelope metadata.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Literacy => "literacy",
            Self::Numeracy => "numeracy",
        }
    }
}

impl FromStr for Capability {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_choice(
            "capability",
            s,
            &[("literacy", Self::Literacy), ("numeracy", Self::Numeracy)],
            "literacy|numeracy",
        )
    }
}

/// Broker endpoint and publish topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    host: String,
    port: u16,
    cluster_id: String,
    topic: String,
}

impl BrokerConfig {
    /// Broker host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Broker port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Broker cluster id.
    #[must_use]
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Topic every envelope is published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Connection URL, e.g. `nats://localhost:4222`.
    #[must_use]
    pub fn url(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }
}

/// Where and how the watch folder is polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    folder: Utf8PathBuf,
    suffix: Option<String>,
    interval: Duration,
    recursive: bool,
    dotfiles: bool,
    ignore: Vec<Utf8PathBuf>,
}

impl WatchConfig {
    /// Canonical path of the watched folder.
    #[must_use]
    pub fn folder(&self) -> &Utf8Path {
        &self.folder
    }

    /// File suffix filter without the leading dot, if any.
    #[must_use]
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Poll interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether subfolders are watched.
    #[must_use]
    pub const fn recursive(&self) -> bool {
        self.recursive
    }

    /// Whether dot files are processed.
    #[must_use]
    pub const fn dotfiles(&self) -> bool {
        self.dotfiles
    }

    /// Absolute paths excluded from watching.
    #[must_use]
    pub fn ignore(&self) -> &[Utf8PathBuf] {
        &self.ignore
    }
}

/// Validated, immutable reader configuration.
///
/// Only obtainable through [`ReaderSettings::build`], so every instance has
/// passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    name: String,
    id: String,
    provider_name: String,
    input_format: InputFormat,
    align_method: Option<AlignMethod>,
    level_method: Option<LevelMethod>,
    capability: Option<Capability>,
    broker: BrokerConfig,
    watch: WatchConfig,
    concurrent_files: NonZeroUsize,
    drain_timeout: Option<Duration>,
}

impl ReaderConfig {
    /// Reader name, also used as the broker client id.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique reader id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the system that produced the data.
    #[must_use]
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Input file format.
    #[must_use]
    pub const fn input_format(&self) -> InputFormat {
        self.input_format
    }

    /// Alignment method, if configured.
    #[must_use]
    pub const fn align_method(&self) -> Option<AlignMethod> {
        self.align_method
    }

    /// Leveling method, if configured.
    #[must_use]
    pub const fn level_method(&self) -> Option<LevelMethod> {
        self.level_method
    }

    /// Capability tag, if configured.
    #[must_use]
    pub const fn capability(&self) -> Option<Capability> {
        self.capability
    }

    /// Broker settings.
    #[must_use]
    pub const fn broker(&self) -> &BrokerConfig {
        &self.broker
    }

    /// Watch settings.
    #[must_use]
    pub const fn watch(&self) -> &WatchConfig {
        &self.watch
    }

    /// Maximum number of files processed at once.
    #[must_use]
    pub const fn concurrent_files(&self) -> usize {
        self.concurrent_files.get()
    }

    /// How long close waits for in-flight work. `None` abandons it.
    #[must_use]
    pub const fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout
    }

    /// Builds the metadata block attached to every envelope.
    #[must_use]
    pub fn meta(&self) -> Meta {
        Meta {
            provider_name: self.provider_name.clone(),
            input_format: self.input_format.as_str().to_owned(),
            align_method: self
                .align_method
                .map(|m| m.as_str().to_owned())
                .unwrap_or_default(),
            level_method: self
                .level_method
                .map(|m| m.as_str().to_owned())
                .unwrap_or_default(),
            reader_name: self.name.clone(),
            reader_id: self.id.clone(),
            capability: self
                .capability
                .map(|c| c.as_str().to_owned())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for ReaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: Option<T>) -> String {
            v.map(|v| v.to_string()).unwrap_or_default()
        }

        let ignore = self
            .watch
            .ignore
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let drain = self.drain_timeout.map_or_else(
            || "abandon in-flight work".to_owned(),
            |d| humantime::format_duration(d).to_string(),
        );

        writeln!(f, "OTF-Reader Configuration")?;
        writeln!(f, "------------------------")?;
        writeln!(f, "{:<24}{}", "reader name:", self.name)?;
        writeln!(f, "{:<24}{}", "reader ID:", self.id)?;
        writeln!(f, "{:<24}{}", "data provider:", self.provider_name)?;
        writeln!(f, "{:<24}{}", "input format:", self.input_format)?;
        writeln!(f, "{:<24}{}", "align method:", opt(self.align_method.map(AlignMethod::as_str)))?;
        writeln!(f, "{:<24}{}", "level method:", opt(self.level_method.map(LevelMethod::as_str)))?;
        writeln!(f, "{:<24}{}", "gen-capability:", opt(self.capability.map(Capability::as_str)))?;
        writeln!(f, "{:<24}{}", "nats host:", self.broker.host)?;
        writeln!(f, "{:<24}{}", "nats port:", self.broker.port)?;
        writeln!(f, "{:<24}{}", "nats cluster-id:", self.broker.cluster_id)?;
        writeln!(f, "{:<24}{}", "nats topic:", self.broker.topic)?;
        writeln!(f, "{:<24}{}", "watch folder:", self.watch.folder)?;
        writeln!(f, "{:<24}{}", "watch file suffix:", opt(self.watch.suffix.as_deref()))?;
        writeln!(
            f,
            "{:<24}{}",
            "watch poll interval:",
            humantime::format_duration(self.watch.interval)
        )?;
        writeln!(f, "{:<24}{}", "watch recursive:", self.watch.recursive)?;
        writeln!(f, "{:<24}{}", "watch dot files:", self.watch.dotfiles)?;
        writeln!(f, "{:<24}{}", "ignore files:", ignore)?;
        writeln!(f, "{:<24}{}", "max concurrent files:", self.concurrent_files)?;
        write!(f, "{:<24}{}", "shutdown drain:", drain)
    }
}

/// Raw reader settings, prior to validation.
///
/// Field names follow the command-line flags, so a JSON config file uses the
/// same keys as the flags: `inputFormat`, `natsPort`, `concurrentFiles`, and
/// so on. Empty strings and zero mean "not set" and fall back to defaults
/// where the option has one.
///
/// # Examples
///
/// ```
/// use otf_core::ReaderSettings;
///
/// let settings: ReaderSettings =
///     serde_json::from_str(r#"{"topic": "otf.raw", "concurrentFiles": 4}"#).unwrap();
/// assert_eq!(settings.topic, "otf.raw");
/// assert_eq!(settings.input_format, "csv");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReaderSettings {
    /// Reader name; generated when empty.
    pub name: String,
    /// Reader id; generated when empty.
    pub id: String,
    /// Data provider name; `unspecified` when empty.
    pub provider: String,
    /// `csv` or `json`.
    pub input_format: String,
    /// `prescribed`, `mapped` or `inferred`; optional.
    pub align_method: String,
    /// `prescribed`, `mapped` or `rules`; optional.
    pub level_method: String,
    /// `literacy` or `numeracy`; optional.
    pub capability: String,
    /// Broker host; `localhost` when empty.
    pub nats_host: String,
    /// Broker port; `4222` when zero.
    pub nats_port: u16,
    /// Broker cluster id; `test-cluster` when empty.
    pub nats_cluster: String,
    /// Publish topic; required.
    pub topic: String,
    /// Watch folder; current directory when empty.
    pub folder: String,
    /// File suffix filter, e.g. `.csv`; optional.
    pub suffix: String,
    /// Poll interval such as `500ms` or `2s`.
    pub interval: String,
    /// Watch subfolders; defaults to `true`.
    pub recursive: Option<bool>,
    /// Process dot files; defaults to `false`.
    pub dotfiles: Option<bool>,
    /// Comma-separated paths to ignore.
    pub ignore: String,
    /// Maximum concurrent files; `10` when zero.
    pub concurrent_files: usize,
    /// How long to wait for in-flight work at shutdown; abandon when empty.
    pub drain_timeout: String,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            id: String::new(),
            provider: String::new(),
            input_format: "csv".to_owned(),
            align_method: String::new(),
            level_method: String::new(),
            capability: String::new(),
            nats_host: String::new(),
            nats_port: 0,
            nats_cluster: String::new(),
            topic: String::new(),
            folder: String::new(),
            suffix: String::new(),
            interval: String::new(),
            recursive: None,
            dotfiles: None,
            ignore: String::new(),
            concurrent_files: 0,
            drain_timeout: String::new(),
        }
    }
}

impl ReaderSettings {
    /// Creates settings with every option at its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from a JSON config file.
    pub fn from_json_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Sets the reader name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the reader id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the data provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Sets the input format.
    #[must_use]
    pub fn input_format(mut self, format: impl Into<String>) -> Self {
        self.input_format = format.into();
        self
    }

    /// Sets the alignment method.
    #[must_use]
    pub fn align_method(mut self, method: impl Into<String>) -> Self {
        self.align_method = method.into();
        self
    }

    /// Sets the leveling method.
    #[must_use]
    pub fn level_method(mut self, method: impl Into<String>) -> Self {
        self.level_method = method.into();
        self
    }

    /// Sets the capability tag.
    #[must_use]
    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = capability.into();
        self
    }

    /// Sets the broker host.
    #[must_use]
    pub fn nats_host(mut self, host: impl Into<String>) -> Self {
        self.nats_host = host.into();
        self
    }

    /// Sets the broker port.
    #[must_use]
    pub const fn nats_port(mut self, port: u16) -> Self {
        self.nats_port = port;
        self
    }

    /// Sets the broker cluster id.
    #[must_use]
    pub fn nats_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.nats_cluster = cluster.into();
        self
    }

    /// Sets the publish topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Sets the watch folder.
    #[must_use]
    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    /// Sets the file suffix filter.
    #[must_use]
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = interval.into();
        self
    }

    /// Sets whether subfolders are watched.
    #[must_use]
    pub const fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = Some(recursive);
        self
    }

    /// Sets whether dot files are processed.
    #[must_use]
    pub const fn dotfiles(mut self, dotfiles: bool) -> Self {
        self.dotfiles = Some(dotfiles);
        self
    }

    /// Sets the comma-separated ignore list.
    #[must_use]
    pub fn ignore(mut self, ignore: impl Into<String>) -> Self {
        self.ignore = ignore.into();
        self
    }

    /// Sets the maximum number of concurrent files.
    #[must_use]
    pub const fn concurrent_files(mut self, n: usize) -> Self {
        self.concurrent_files = n;
        self
    }

    /// Sets the shutdown drain timeout.
    #[must_use]
    pub fn drain_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.drain_timeout = timeout.into();
        self
    }

    /// Validates every option and produces a [`ReaderConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigErrors`] listing every invalid option.
    pub fn build(self) -> Result<ReaderConfig, ConfigErrors> {
        let mut errors = Vec::new();

        let input_format = if self.input_format.trim().is_empty() {
            errors.push(ConfigError::Required {
                option: "input format",
            });
            None
        } else {
            keep(&mut errors, self.input_format.parse::<InputFormat>())
        };
        let align_method = parse_optional::<AlignMethod>(&mut errors, &self.align_method);
        let level_method = parse_optional::<LevelMethod>(&mut errors, &self.level_method);
        let capability = parse_optional::<Capability>(&mut errors, &self.capability);

        let topic = if self.topic.is_empty() {
            errors.push(ConfigError::Required { option: "topic" });
            None
        } else if is_valid_topic(&self.topic) {
            Some(self.topic.clone())
        } else {
            errors.push(ConfigError::InvalidTopic(self.topic.clone()));
            None
        };

        let interval = keep(&mut errors, parse_interval(&self.interval));
        let drain_timeout = keep(&mut errors, parse_drain_timeout(&self.drain_timeout));
        let folder = keep(&mut errors, resolve_folder(&self.folder));
        let ignore = folder
            .as_deref()
            .map(|root| resolve_ignore(root, &self.ignore))
            .unwrap_or_default();

        let (Some(input_format), Some(topic), Some(interval), Some(drain_timeout), Some(folder)) =
            (input_format, topic, interval, drain_timeout, folder)
        else {
            return Err(ConfigErrors::new(errors));
        };
        if !errors.is_empty() {
            return Err(ConfigErrors::new(errors));
        }

        let suffix = Some(self.suffix.trim().trim_matches('.'))
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        let concurrent_files = NonZeroUsize::new(self.concurrent_files)
            .or(NonZeroUsize::new(DEFAULT_CONCURRENT_FILES))
            .unwrap_or(NonZeroUsize::MIN);

        Ok(ReaderConfig {
            name: or_else(self.name, generate_name),
            id: or_else(self.id, generate_id),
            provider_name: or_else(self.provider, || DEFAULT_PROVIDER.to_owned()),
            input_format,
            align_method,
            level_method,
            capability,
            broker: BrokerConfig {
                host: or_else(self.nats_host, || DEFAULT_HOST.to_owned()),
                port: if self.nats_port == 0 {
                    DEFAULT_PORT
                } else {
                    self.nats_port
                },
                cluster_id: or_else(self.nats_cluster, || DEFAULT_CLUSTER.to_owned()),
                topic,
            },
            watch: WatchConfig {
                folder,
                suffix,
                interval,
                recursive: self.recursive.unwrap_or(true),
                dotfiles: self.dotfiles.unwrap_or(false),
                ignore,
            },
            concurrent_files,
            drain_timeout,
        })
    }
}

fn keep<T>(errors: &mut Vec<ConfigError>, result: Result<T, ConfigError>) -> Option<T> {
    result.map_err(|err| errors.push(err)).ok()
}

fn parse_optional<T: FromStr<Err = ConfigError>>(
    errors: &mut Vec<ConfigError>,
    raw: &str,
) -> Option<T> {
    if raw.trim().is_empty() {
        return None;
    }
    keep(errors, raw.parse())
}

fn or_else(value: String, default: impl FnOnce() -> String) -> String {
    if value.trim().is_empty() {
        default()
    } else {
        value
    }
}

fn parse_interval(raw: &str) -> Result<Duration, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(DEFAULT_INTERVAL);
    }
    let interval =
        humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::InvalidInterval {
            value: raw.to_owned(),
            reason: e.to_string(),
        })?;
    if interval.is_zero() {
        return Err(ConfigError::InvalidInterval {
            value: raw.to_owned(),
            reason: "must be greater than zero".to_owned(),
        });
    }
    Ok(interval)
}

fn parse_drain_timeout(raw: &str) -> Result<Option<Duration>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    humantime::parse_duration(raw.trim())
        .map(Some)
        .map_err(|e| ConfigError::InvalidOption {
            option: "drain timeout",
            reason: e.to_string(),
        })
}

fn resolve_folder(raw: &str) -> Result<Utf8PathBuf, ConfigError> {
    let folder = if raw.trim().is_empty() {
        let cwd = std::env::current_dir()?;
        Utf8PathBuf::try_from(cwd).map_err(|e| ConfigError::InvalidPath {
            path: Utf8PathBuf::from(e.as_path().to_string_lossy().into_owned()),
            reason: "no watch folder specified and the working directory is not UTF-8".to_owned(),
        })?
    } else {
        Utf8PathBuf::from(raw)
    };

    if !folder.exists() {
        return Err(ConfigError::MissingDirectory(folder));
    }
    if !folder.is_dir() {
        return Err(ConfigError::InvalidPath {
            path: folder,
            reason: "not a directory".to_owned(),
        });
    }
    folder
        .canonicalize_utf8()
        .map_err(|e| ConfigError::InvalidPath {
            path: folder,
            reason: e.to_string(),
        })
}

fn resolve_ignore(root: &Utf8Path, raw: &str) -> Vec<Utf8PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let path = Utf8Path::new(entry);
            if path.is_absolute() {
                path.to_owned()
            } else {
                root.join(path)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings_in(dir: &TempDir) -> ReaderSettings {
        let folder = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir");
        ReaderSettings::new().topic("t1").folder(folder.as_str())
    }

    #[test]
    fn test_defaults_applied() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings_in(&dir).build().expect("valid config");

        assert!(config.name().starts_with("otf-reader-"));
        assert_eq!(config.id().len(), 32);
        assert_eq!(config.provider_name(), "unspecified");
        assert_eq!(config.input_format(), InputFormat::Csv);
        assert_eq!(config.broker().host(), "localhost");
        assert_eq!(config.broker().port(), 4222);
        assert_eq!(config.broker().cluster_id(), "test-cluster");
        assert_eq!(config.broker().url(), "nats://localhost:4222");
        assert_eq!(config.watch().interval(), DEFAULT_INTERVAL);
        assert!(config.watch().recursive());
        assert!(!config.watch().dotfiles());
        assert_eq!(config.concurrent_files(), 10);
        assert_eq!(config.drain_timeout(), None);
    }

    #[test]
    fn test_explicit_values_kept() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings_in(&dir)
            .name("reader-a")
            .id("abc")
            .provider("maths-pathway")
            .input_format(".JSON")
            .align_method("Mapped")
            .level_method("rules")
            .capability("numeracy")
            .nats_host("broker.local")
            .nats_port(4333)
            .suffix(".json")
            .interval("2s")
            .recursive(false)
            .dotfiles(true)
            .concurrent_files(3)
            .drain_timeout("5s")
            .build()
            .expect("valid config");

        assert_eq!(config.name(), "reader-a");
        assert_eq!(config.id(), "abc");
        assert_eq!(config.input_format(), InputFormat::Json);
        assert_eq!(config.align_method(), Some(AlignMethod::Mapped));
        assert_eq!(config.level_method(), Some(LevelMethod::Rules));
        assert_eq!(config.capability(), Some(Capability::Numeracy));
        assert_eq!(config.broker().url(), "nats://broker.local:4333");
        assert_eq!(config.watch().suffix(), Some("json"));
        assert_eq!(config.watch().interval(), Duration::from_secs(2));
        assert!(!config.watch().recursive());
        assert!(config.watch().dotfiles());
        assert_eq!(config.concurrent_files(), 3);
        assert_eq!(config.drain_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_topics_rejected() {
        let dir = TempDir::new().expect("temp dir");
        for topic in [".t", "t.", "t 1", "t-1", "*"] {
            let errors = settings_in(&dir).topic(topic).build().expect_err("invalid");
            assert!(
                errors
                    .errors()
                    .iter()
                    .any(|e| matches!(e, ConfigError::InvalidTopic(t) if t == topic)),
                "{topic} should be rejected"
            );
        }
    }

    #[test]
    fn test_missing_topic_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let errors = settings_in(&dir).topic("").build().expect_err("invalid");
        assert!(matches!(
            errors.errors(),
            [ConfigError::Required { option: "topic" }]
        ));
    }

    #[test]
    fn test_xml_not_supported() {
        let dir = TempDir::new().expect("temp dir");
        let errors = settings_in(&dir).input_format("xml").build().expect_err("invalid");
        assert!(errors.to_string().contains("'xml' not supported"));
    }

    #[test]
    fn test_all_errors_collected() {
        let errors = ReaderSettings::new()
            .input_format("xml")
            .align_method("guess")
            .level_method("vibes")
            .capability("art")
            .topic("bad topic")
            .interval("soon")
            .folder("/definitely/not/here")
            .build()
            .expect_err("invalid");

        assert_eq!(errors.len(), 7);
        assert!(errors
            .errors()
            .iter()
            .any(|e| matches!(e, ConfigError::MissingDirectory(_))));
        assert!(errors
            .errors()
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidInterval { .. })));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let errors = settings_in(&dir).interval("0s").build().expect_err("invalid");
        assert!(errors.to_string().contains("greater than zero"));
    }

    #[test]
    fn test_folder_must_be_directory() {
        let dir = TempDir::new().expect("temp dir");
        let file = dir.path().join("data.csv");
        std::fs::write(&file, "a,b\n").expect("write");

        let errors = ReaderSettings::new()
            .topic("t1")
            .folder(file.to_string_lossy())
            .build()
            .expect_err("invalid");
        assert!(matches!(errors.errors(), [ConfigError::InvalidPath { .. }]));
    }

    #[test]
    fn test_ignore_list_resolved_against_folder() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings_in(&dir)
            .ignore(" tmp , ,/abs/skip")
            .build()
            .expect("valid config");

        let ignore = config.watch().ignore();
        assert_eq!(ignore.len(), 2);
        assert_eq!(ignore[0], config.watch().folder().join("tmp"));
        assert_eq!(ignore[1], Utf8PathBuf::from("/abs/skip"));
    }

    #[test]
    fn test_meta_empty_strings_for_unset_tags() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings_in(&dir)
            .name("r1")
            .id("id1")
            .provider("vendor")
            .build()
            .expect("valid config");

        let meta = config.meta();
        assert_eq!(meta.provider_name, "vendor");
        assert_eq!(meta.input_format, "csv");
        assert_eq!(meta.align_method, "");
        assert_eq!(meta.level_method, "");
        assert_eq!(meta.capability, "");
        assert_eq!(meta.reader_name, "r1");
        assert_eq!(meta.reader_id, "id1");
    }

    #[test]
    fn test_display_dump() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings_in(&dir)
            .name("r1")
            .interval("1s")
            .build()
            .expect("valid config");

        let dump = config.to_string();
        assert!(dump.starts_with("OTF-Reader Configuration"));
        assert!(dump.contains("reader name:            r1"));
        assert!(dump.contains("nats topic:             t1"));
        assert!(dump.contains("watch poll interval:    1s"));
        assert!(dump.contains("shutdown drain:         abandon in-flight work"));
    }

    #[test]
    fn test_display_dump_lists_ignored_paths() {
        let dir = TempDir::new().expect("temp dir");
        let config = settings_in(&dir)
            .ignore("tmp,/abs/skip")
            .build()
            .expect("valid config");

        let expected = format!("{},/abs/skip", config.watch().folder().join("tmp"));
        let dump = config.to_string();
        let line = dump
            .lines()
            .find(|l| l.starts_with("ignore files:"))
            .expect("ignore line");
        assert_eq!(line.trim_start_matches("ignore files:").trim(), expected);
    }

    #[test]
    fn test_settings_from_json_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("reader.json");
        std::fs::write(
            &path,
            r#"{"name": "from-file", "natsPort": 4333, "recursive": false}"#,
        )
        .expect("write");

        let path = Utf8PathBuf::try_from(path).expect("utf-8 path");
        let settings = ReaderSettings::from_json_file(&path).expect("load");
        assert_eq!(settings.name, "from-file");
        assert_eq!(settings.nats_port, 4333);
        assert_eq!(settings.recursive, Some(false));
        assert_eq!(settings.input_format, "csv");
    }

    #[test]
    fn test_settings_from_bad_json_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("reader.json");
        std::fs::write(&path, "{not json").expect("write");

        let path = Utf8PathBuf::try_from(path).expect("utf-8 path");
        let err = ReaderSettings::from_json_file(&path).expect_err("invalid");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
