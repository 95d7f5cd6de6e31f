//! Sectioned configuration backed by a TOML file.
//!
//! Every leaf is kept in its original string form. Typed getters parse on
//! first read and cache the result; typed setters write the string form
//! back so the two views cannot drift. A malformed value only becomes an
//! error when its getter is called.

use crate::defaults;
use crate::error::{Result, ScribepoolError};
use crate::qualification::Qualification;
use crate::timespec::Timespec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    local: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    templates: Option<String>,
    pub assignment: AssignmentConfig,
    #[serde(rename = "remote-object-store", skip_serializing_if = "Option::is_none")]
    pub object_store: Option<ObjectStoreConfig>,
    #[serde(rename = "remote-transfer", skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferConfig>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Only the TOML syntax is checked here; field values are validated
    /// lazily by their getters.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScribepoolError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ScribepoolError::Io(e)
            }
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(ScribepoolError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Write the configuration back out. Only setup tools and test harnesses do this.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string(self)
            .map_err(|e| ScribepoolError::Other(format!("Failed to serialize configuration: {e}")))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SCRIBEPOOL_LOCAL → local
    /// - SCRIBEPOOL_TEMPLATES → templates
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(local) = std::env::var("SCRIBEPOOL_LOCAL")
            && !local.is_empty()
        {
            self.local = Some(local);
        }

        if let Ok(templates) = std::env::var("SCRIBEPOOL_TEMPLATES")
            && !templates.is_empty()
        {
            self.templates = Some(templates);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/scribepool/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("scribepool").join("config.toml"))
    }

    /// File this configuration was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Directory holding local project directories, with `~` expanded.
    pub fn local(&self) -> Option<PathBuf> {
        self.local.as_deref().map(expand_home)
    }

    pub fn local_raw(&self) -> Option<&str> {
        self.local.as_deref()
    }

    pub fn set_local(&mut self, local: impl Into<String>) {
        self.local = Some(local.into());
    }

    /// Directory holding assignment templates, with `~` expanded.
    pub fn templates(&self) -> Option<PathBuf> {
        self.templates.as_deref().map(expand_home)
    }

    pub fn set_templates(&mut self, templates: impl Into<String>) {
        self.templates = Some(templates.into());
    }
}

fn expand_home(raw: &str) -> PathBuf {
    let trimmed = trim_trailing_slash(raw);
    match trimmed.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(trimmed),
        },
        _ => PathBuf::from(trimmed),
    }
}

fn trim_trailing_slash(raw: &str) -> &str {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() { raw } else { trimmed }
}

fn missing(field: &str) -> ScribepoolError {
    ScribepoolError::argument(format!("missing required config field {field}"))
}

/// Return the cached value, parsing and caching it on first access.
///
/// Failures are not cached, so a later fix through a setter takes effect.
fn cached<'a, T>(cell: &'a OnceLock<T>, parse: impl FnOnce() -> Result<T>) -> Result<&'a T> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = parse()?;
    Ok(cell.get_or_init(|| value))
}

/// Per-chunk payment, held in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reward {
    cents: u64,
}

impl Reward {
    pub fn from_cents(cents: u64) -> Self {
        Self { cents }
    }

    pub fn cents(self) -> u64 {
        self.cents
    }
}

impl FromStr for Reward {
    type Err = ScribepoolError;

    /// Accepts `N`, `N.N`, `N.NN`, `.N` and `.NN`.
    fn from_str(text: &str) -> Result<Self> {
        let bad = || ScribepoolError::format(format!("can't make sense of reward '{text}'"));
        let trimmed = text.trim();
        let (dollars, cents) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if (dollars.is_empty() && cents.is_empty())
            || (trimmed.contains('.') && cents.is_empty())
            || cents.len() > 2
            || !digits(dollars)
            || !digits(cents)
        {
            return Err(bad());
        }
        let dollars: u64 = if dollars.is_empty() {
            0
        } else {
            dollars.parse().map_err(|_| bad())?
        };
        let cents: u64 = match cents.len() {
            0 => 0,
            1 => cents.parse::<u64>().map_err(|_| bad())? * 10,
            _ => cents.parse().map_err(|_| bad())?,
        };
        dollars
            .checked_mul(100)
            .and_then(|d| d.checked_add(cents))
            .map(Self::from_cents)
            .ok_or_else(bad)
    }
}

impl fmt::Display for Reward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.cents / 100, self.cents % 100)
    }
}

/// Fields of the `[assignment]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentField {
    Reward,
    Currency,
    Keywords,
    Deadline,
    Lifetime,
    Approval,
    Qualify,
    Copies,
}

impl AssignmentField {
    pub const ALL: &'static [AssignmentField] = &[
        Self::Reward,
        Self::Currency,
        Self::Keywords,
        Self::Deadline,
        Self::Lifetime,
        Self::Approval,
        Self::Qualify,
        Self::Copies,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Reward => "reward",
            Self::Currency => "currency",
            Self::Keywords => "keywords",
            Self::Deadline => "deadline",
            Self::Lifetime => "lifetime",
            Self::Approval => "approval",
            Self::Qualify => "qualify",
            Self::Copies => "copies",
        }
    }

    pub fn is_list(self) -> bool {
        matches!(self, Self::Keywords | Self::Qualify)
    }

    fn key(self) -> String {
        format!("assignment.{}", self.name())
    }
}

impl FromStr for AssignmentField {
    type Err = ScribepoolError;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.name() == name)
            .ok_or_else(|| ScribepoolError::argument(format!("unknown assignment field '{name}'")))
    }
}

/// Raw string view of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawValue<'a> {
    Unset,
    Scalar(&'a str),
    List(&'a [String]),
}

#[derive(Debug, Clone, Default)]
struct AssignmentCache {
    reward: OnceLock<Reward>,
    deadline: OnceLock<Timespec>,
    lifetime: OnceLock<Timespec>,
    approval: OnceLock<Timespec>,
    qualify: OnceLock<Vec<Qualification>>,
    copies: OnceLock<u32>,
}

/// `[assignment]`: how each chunk is advertised on the marketplace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    reward: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    currency: Option<String>,
    #[serde(deserialize_with = "raw::list", skip_serializing_if = "Vec::is_empty")]
    keywords: Vec<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    deadline: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    lifetime: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    approval: Option<String>,
    #[serde(deserialize_with = "raw::list", skip_serializing_if = "Vec::is_empty")]
    qualify: Vec<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    copies: Option<String>,
    #[serde(skip)]
    cache: AssignmentCache,
}

impl AssignmentConfig {
    /// Raw stored form of `field`, without defaults applied.
    pub fn raw(&self, field: AssignmentField) -> RawValue<'_> {
        let stored = match field {
            AssignmentField::Keywords => return RawValue::List(&self.keywords),
            AssignmentField::Qualify => return RawValue::List(&self.qualify),
            AssignmentField::Reward => &self.reward,
            AssignmentField::Currency => &self.currency,
            AssignmentField::Deadline => &self.deadline,
            AssignmentField::Lifetime => &self.lifetime,
            AssignmentField::Approval => &self.approval,
            AssignmentField::Copies => &self.copies,
        };
        match stored {
            Some(value) => RawValue::Scalar(value),
            None => RawValue::Unset,
        }
    }

    /// Store a scalar field verbatim. Validation happens on the next typed read.
    pub fn set_raw(&mut self, field: AssignmentField, value: impl Into<String>) -> Result<()> {
        let value = Some(value.into());
        match field {
            AssignmentField::Keywords | AssignmentField::Qualify => {
                return Err(ScribepoolError::argument(format!(
                    "{} is a list; use set_raw_list",
                    field.key()
                )));
            }
            AssignmentField::Reward => {
                self.reward = value;
                self.cache.reward = OnceLock::new();
            }
            AssignmentField::Currency => self.currency = value,
            AssignmentField::Deadline => {
                self.deadline = value;
                self.cache.deadline = OnceLock::new();
            }
            AssignmentField::Lifetime => {
                self.lifetime = value;
                self.cache.lifetime = OnceLock::new();
            }
            AssignmentField::Approval => {
                self.approval = value;
                self.cache.approval = OnceLock::new();
            }
            AssignmentField::Copies => {
                self.copies = value;
                self.cache.copies = OnceLock::new();
            }
        }
        Ok(())
    }

    /// Store a list field verbatim.
    pub fn set_raw_list(&mut self, field: AssignmentField, values: Vec<String>) -> Result<()> {
        match field {
            AssignmentField::Keywords => self.keywords = values,
            AssignmentField::Qualify => {
                self.qualify = values;
                self.cache.qualify = OnceLock::new();
            }
            _ => {
                return Err(ScribepoolError::argument(format!(
                    "{} is not a list; use set_raw",
                    field.key()
                )));
            }
        }
        Ok(())
    }

    pub fn reward(&self) -> Result<Reward> {
        cached(&self.cache.reward, || {
            let raw = self
                .reward
                .as_deref()
                .ok_or_else(|| missing(&AssignmentField::Reward.key()))?;
            raw.parse::<Reward>()
                .map_err(|e| e.context(&AssignmentField::Reward.key()))
        })
        .copied()
    }

    pub fn set_reward(&mut self, reward: Reward) {
        self.reward = Some(reward.to_string());
        self.cache.reward = OnceLock::from(reward);
    }

    pub fn currency(&self) -> &str {
        self.currency.as_deref().unwrap_or(defaults::CURRENCY)
    }

    pub fn set_currency(&mut self, currency: impl Into<String>) {
        self.currency = Some(currency.into());
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn set_keywords(&mut self, keywords: Vec<String>) {
        self.keywords = keywords;
    }

    pub fn add_keyword(&mut self, keyword: impl Into<String>) {
        self.keywords.push(keyword.into());
    }

    /// Time a worker has to complete one task.
    pub fn deadline(&self) -> Result<&Timespec> {
        self.timespec(AssignmentField::Deadline)
    }

    pub fn set_deadline(&mut self, spec: Timespec) {
        self.deadline = Some(spec.to_string());
        self.cache.deadline = OnceLock::from(spec);
    }

    /// Time a task stays listed before it expires.
    pub fn lifetime(&self) -> Result<&Timespec> {
        self.timespec(AssignmentField::Lifetime)
    }

    pub fn set_lifetime(&mut self, spec: Timespec) {
        self.lifetime = Some(spec.to_string());
        self.cache.lifetime = OnceLock::from(spec);
    }

    /// Time after submission before work is approved automatically.
    pub fn approval(&self) -> Result<&Timespec> {
        self.timespec(AssignmentField::Approval)
    }

    pub fn set_approval(&mut self, spec: Timespec) {
        self.approval = Some(spec.to_string());
        self.cache.approval = OnceLock::from(spec);
    }

    fn timespec(&self, field: AssignmentField) -> Result<&Timespec> {
        let (raw, default, cell) = match field {
            AssignmentField::Deadline => (&self.deadline, defaults::DEADLINE, &self.cache.deadline),
            AssignmentField::Lifetime => (&self.lifetime, defaults::LIFETIME, &self.cache.lifetime),
            AssignmentField::Approval => (&self.approval, defaults::APPROVAL, &self.cache.approval),
            other => {
                return Err(ScribepoolError::argument(format!(
                    "{} is not a timespec",
                    other.key()
                )));
            }
        };
        cached(cell, || {
            raw.as_deref()
                .unwrap_or(default)
                .parse::<Timespec>()
                .map_err(|e| e.context(&field.key()))
        })
    }

    /// Eligibility rules, in the order they were written.
    pub fn qualify(&self) -> Result<&[Qualification]> {
        cached(&self.cache.qualify, || {
            self.qualify
                .iter()
                .map(|raw| {
                    raw.parse::<Qualification>()
                        .map_err(|e| e.context(&AssignmentField::Qualify.key()))
                })
                .collect()
        })
        .map(Vec::as_slice)
    }

    pub fn set_qualify(&mut self, qualifications: Vec<Qualification>) {
        self.qualify = qualifications.iter().map(ToString::to_string).collect();
        self.cache.qualify = OnceLock::from(qualifications);
    }

    /// Parse and append one qualification. Nothing is stored if parsing fails.
    pub fn add_qualification(&mut self, text: &str) -> Result<()> {
        let qualification: Qualification = text.parse()?;
        let mut current = self.qualify()?.to_vec();
        current.push(qualification);
        self.set_qualify(current);
        Ok(())
    }

    /// How many workers should transcribe each chunk.
    pub fn copies(&self) -> Result<u32> {
        cached(&self.cache.copies, || {
            let raw = self.copies.as_deref().unwrap_or(defaults::COPIES);
            match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(ScribepoolError::format(format!(
                    "{}: copies must be a positive integer, got '{raw}'",
                    AssignmentField::Copies.key()
                ))),
            }
        })
        .copied()
    }

    pub fn set_copies(&mut self, copies: u32) {
        self.copies = Some(copies.to_string());
        self.cache.copies = OnceLock::from(copies);
    }

    /// Parse every field once, returning the first error.
    pub fn validate(&self) -> Result<()> {
        self.reward()?;
        self.deadline()?;
        self.lifetime()?;
        self.approval()?;
        self.qualify()?;
        self.copies()?;
        Ok(())
    }
}

/// `[remote-object-store]`: an S3-compatible bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    key: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    secret: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    bucket: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    url: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    region: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    prefix: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    endpoint: Option<String>,
}

impl ObjectStoreConfig {
    pub fn new(key: &str, secret: &str, bucket: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            secret: Some(secret.to_string()),
            bucket: Some(bucket.to_string()),
            ..Self::default()
        }
    }

    pub fn key(&self) -> Result<&str> {
        self.key
            .as_deref()
            .ok_or_else(|| missing("remote-object-store.key"))
    }

    pub fn secret(&self) -> Result<&str> {
        self.secret
            .as_deref()
            .ok_or_else(|| missing("remote-object-store.secret"))
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref().filter(|b| !b.is_empty())
    }

    pub fn set_bucket(&mut self, bucket: impl Into<String>) {
        self.bucket = Some(bucket.into());
    }

    /// Public base URL, if one overrides the bucket's own address.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().map(trim_trailing_slash)
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(defaults::S3_REGION)
    }

    /// Key prefix inside the bucket, without surrounding slashes.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
    }

    /// API endpoint override, for S3-compatible stores other than AWS.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref().map(trim_trailing_slash)
    }

    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        self.endpoint = Some(endpoint.into());
    }
}

/// `[remote-transfer]`: a directory on an SFTP host served over HTTP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    user: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    host: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    path: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    url: Option<String>,
    #[serde(
        deserialize_with = "raw::option",
        skip_serializing_if = "Option::is_none"
    )]
    identity: Option<String>,
}

impl TransferConfig {
    pub fn new(user: &str, host: &str, path: &str, url: &str) -> Self {
        Self {
            user: Some(user.to_string()),
            host: Some(host.to_string()),
            path: Some(path.to_string()),
            url: Some(url.to_string()),
            identity: None,
        }
    }

    pub fn user(&self) -> Result<&str> {
        self.user.as_deref().ok_or_else(|| missing("remote-transfer.user"))
    }

    pub fn host(&self) -> Result<&str> {
        self.host.as_deref().ok_or_else(|| missing("remote-transfer.host"))
    }

    /// Remote directory, without a trailing slash. Empty means the login directory.
    pub fn path(&self) -> &str {
        self.path.as_deref().map(trim_trailing_slash).unwrap_or("")
    }

    pub fn path_raw(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn url(&self) -> Result<&str> {
        self.url
            .as_deref()
            .map(trim_trailing_slash)
            .ok_or_else(|| missing("remote-transfer.url"))
    }

    pub fn url_raw(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    /// Private key passed to `sftp -i`.
    pub fn identity(&self) -> Option<PathBuf> {
        self.identity.as_deref().map(expand_home)
    }

    pub fn is_complete(&self) -> bool {
        self.user.is_some() && self.host.is_some() && self.url.is_some()
    }
}

/// Deserializers that keep leaf values in their textual form.
mod raw {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    fn scalar<E: Error>(value: toml::Value) -> Result<String, E> {
        match value {
            toml::Value::String(s) => Ok(s),
            toml::Value::Integer(i) => Ok(i.to_string()),
            toml::Value::Float(f) => Ok(f.to_string()),
            toml::Value::Boolean(b) => Ok(b.to_string()),
            toml::Value::Datetime(d) => Ok(d.to_string()),
            other => Err(E::custom(format!(
                "expected a single value, found {}",
                other.type_str()
            ))),
        }
    }

    pub fn option<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Option::<toml::Value>::deserialize(d)?.map(scalar).transpose()
    }

    /// Accepts an array of scalars, or a lone scalar as a one-element list.
    pub fn list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        match toml::Value::deserialize(d)? {
            toml::Value::Array(items) => items.into_iter().map(scalar).collect(),
            single => Ok(vec![scalar(single)?]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualification::{Attribute, Comparator};
    use crate::timespec::Unit;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: only called with ENV_LOCK held.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    const REGULAR: &str = r#"
        local = "~/Documents/Transcripts/"
        templates = "/srv/scribepool/templates"

        [assignment]
        reward = 0.75
        deadline = "3h"
        lifetime = "2d"
        approval = "1d"
        keywords = ["transcription", "audio", "mp3"]
        qualify = ["approval_rate >= 95", "hits_approved > 10"]
        copies = 1

        [remote-object-store]
        key = "test101010"
        secret = "test101010secret"
        bucket = "scribepool-test"
    "#;

    const TRANSFER: &str = r#"
        [assignment]
        reward = "0.75"
        deadline = "3z"
        qualify = ["fake_rate > 8", "approval_rate &= 8"]

        [remote-transfer]
        user = "ryan"
        host = "example.com"
        path = "public_html/transfer/"
        url = "http://example.com/mturk/"
    "#;

    #[test]
    fn test_regular_config_typed_values() {
        let config = Config::from_toml_str(REGULAR).unwrap();
        let assignment = &config.assignment;

        assert_eq!(assignment.reward().unwrap(), Reward::from_cents(75));
        assert_eq!(assignment.deadline().unwrap().seconds(), 3 * 60 * 60);
        assert_eq!(assignment.raw(AssignmentField::Deadline), RawValue::Scalar("3h"));
        assert_eq!(assignment.lifetime().unwrap().seconds(), 60 * 60 * 24 * 2);
        assert_eq!(assignment.raw(AssignmentField::Lifetime), RawValue::Scalar("2d"));
        assert_eq!(assignment.keywords().len(), 3);
        assert_eq!(assignment.copies().unwrap(), 1);

        let first = &assignment.qualify().unwrap()[0];
        assert_eq!(first.attribute, Attribute::ApprovalRate);
        assert_eq!(first.comparator, Comparator::Gte);
        assert_eq!(first.value.as_deref(), Some("95"));
    }

    #[test]
    fn test_numbers_are_kept_as_text() {
        let config = Config::from_toml_str(REGULAR).unwrap();
        assert_eq!(
            config.assignment.raw(AssignmentField::Reward),
            RawValue::Scalar("0.75")
        );
        assert_eq!(
            config.assignment.raw(AssignmentField::Copies),
            RawValue::Scalar("1")
        );
    }

    #[test]
    fn test_local_expands_home_and_drops_trailing_slash() {
        let config = Config::from_toml_str(REGULAR).unwrap();
        assert_eq!(config.local_raw(), Some("~/Documents/Transcripts/"));
        let local = config.local().unwrap();
        assert!(local.ends_with("Documents/Transcripts"));
        assert!(!local.to_string_lossy().contains('~'));
    }

    #[test]
    fn test_object_store_section() {
        let config = Config::from_toml_str(REGULAR).unwrap();
        let store = config.object_store.as_ref().unwrap();
        assert!(store.key().unwrap().contains("test101010"));
        assert!(store.secret().unwrap().contains("test101010"));
        assert_eq!(store.bucket(), Some("scribepool-test"));
        assert_eq!(store.url(), None);
        assert_eq!(store.region(), "us-east-1");
    }

    #[test]
    fn test_transfer_section_normalizes_path_and_url() {
        let config = Config::from_toml_str(TRANSFER).unwrap();
        let transfer = config.transfer.as_ref().unwrap();
        assert_eq!(transfer.user().unwrap(), "ryan");
        assert_eq!(transfer.path_raw(), Some("public_html/transfer/"));
        assert_eq!(transfer.path(), "public_html/transfer");
        assert_eq!(transfer.url_raw(), Some("http://example.com/mturk/"));
        assert_eq!(transfer.url().unwrap(), "http://example.com/mturk");
        assert!(transfer.is_complete());
    }

    #[test]
    fn test_bad_values_fail_only_when_read() {
        let mut config = Config::from_toml_str(TRANSFER).unwrap();

        // Unrelated fields still work.
        assert_eq!(config.assignment.reward().unwrap().cents(), 75);

        let err = config.assignment.qualify().unwrap_err();
        assert!(matches!(err, ScribepoolError::Argument { .. }));
        assert!(err.to_string().to_lowercase().contains("unknown type"));
        assert!(err.to_string().contains("assignment.qualify"));

        let last = match config.assignment.raw(AssignmentField::Qualify) {
            RawValue::List(items) => items.last().cloned().unwrap(),
            other => panic!("Expected list, got {other:?}"),
        };
        config
            .assignment
            .set_raw_list(AssignmentField::Qualify, vec![last])
            .unwrap();
        let err = config.assignment.qualify().unwrap_err();
        assert!(err.to_string().to_lowercase().contains("unknown comparator"));

        assert_eq!(config.assignment.raw(AssignmentField::Deadline), RawValue::Scalar("3z"));
        let err = config.assignment.deadline().unwrap_err();
        assert!(matches!(err, ScribepoolError::Format { .. }));
        assert!(err.to_string().contains("can't convert"));
        assert!(err.to_string().contains("assignment.deadline"));
        assert!(err.to_string().contains("3z"));
    }

    #[test]
    fn test_defaults_apply_when_unset() {
        let config = Config::default();
        let assignment = &config.assignment;
        assert_eq!(assignment.currency(), "USD");
        assert_eq!(assignment.deadline().unwrap().seconds(), 3 * 3600);
        assert_eq!(assignment.lifetime().unwrap().seconds(), 2 * 86_400);
        assert_eq!(assignment.approval().unwrap().seconds(), 86_400);
        assert_eq!(assignment.copies().unwrap(), 1);
        assert!(assignment.qualify().unwrap().is_empty());
        assert_eq!(assignment.raw(AssignmentField::Deadline), RawValue::Unset);
    }

    #[test]
    fn test_missing_reward_is_argument_error() {
        let err = Config::default().assignment.reward().unwrap_err();
        assert!(matches!(err, ScribepoolError::Argument { .. }));
        assert!(err.to_string().contains("missing required config field assignment.reward"));
    }

    #[test]
    fn test_typed_setter_round_trips_through_raw() {
        let mut assignment = AssignmentConfig::default();

        assignment.set_deadline(Timespec::new(90, Unit::Minute));
        let RawValue::Scalar(raw) = assignment.raw(AssignmentField::Deadline) else {
            panic!("deadline should be set");
        };
        assert_eq!(raw.parse::<Timespec>().unwrap(), *assignment.deadline().unwrap());

        assignment.set_reward("1.5".parse().unwrap());
        let RawValue::Scalar(raw) = assignment.raw(AssignmentField::Reward) else {
            panic!("reward should be set");
        };
        assert_eq!(raw, "1.50");
        assert_eq!(raw.parse::<Reward>().unwrap(), assignment.reward().unwrap());

        assignment.set_copies(3);
        assert_eq!(assignment.raw(AssignmentField::Copies), RawValue::Scalar("3"));

        assignment.add_qualification("approval_rate >= 95").unwrap();
        assignment.add_qualification("adult exists").unwrap();
        let RawValue::List(raw) = assignment.raw(AssignmentField::Qualify) else {
            panic!("qualify is a list");
        };
        let reparsed: Vec<Qualification> = raw.iter().map(|q| q.parse().unwrap()).collect();
        assert_eq!(reparsed, assignment.qualify().unwrap());
    }

    #[test]
    fn test_set_raw_invalidates_cache() {
        let mut assignment = AssignmentConfig::default();
        assert_eq!(assignment.deadline().unwrap().seconds(), 3 * 3600);
        assignment.set_raw(AssignmentField::Deadline, "4u").unwrap();
        assert!(assignment.deadline().is_err());
        assignment.set_raw(AssignmentField::Deadline, "5m").unwrap();
        assert_eq!(assignment.deadline().unwrap().seconds(), 300);
    }

    #[test]
    fn test_add_qualification_rejects_bad_input_without_storing() {
        let mut assignment = AssignmentConfig::default();
        assert!(assignment.add_qualification("approval_rate &= 8").is_err());
        assert_eq!(assignment.raw(AssignmentField::Qualify), RawValue::List(&[]));
    }

    #[test]
    fn test_field_lookup_by_name() {
        assert_eq!(
            "deadline".parse::<AssignmentField>().unwrap(),
            AssignmentField::Deadline
        );
        assert!("bogus".parse::<AssignmentField>().is_err());
        assert!(AssignmentField::Qualify.is_list());

        let mut assignment = AssignmentConfig::default();
        assert!(assignment.set_raw(AssignmentField::Keywords, "x").is_err());
        assert!(
            assignment
                .set_raw_list(AssignmentField::Deadline, vec!["3h".into()])
                .is_err()
        );
    }

    #[test]
    fn test_reward_parsing() {
        assert_eq!("0.75".parse::<Reward>().unwrap().cents(), 75);
        assert_eq!(".5".parse::<Reward>().unwrap().cents(), 50);
        assert_eq!("2".parse::<Reward>().unwrap().cents(), 200);
        assert_eq!("1.05".parse::<Reward>().unwrap().to_string(), "1.05");
        for bad in ["foo", "", ".", "1.", "1.234", "-1", "$1"] {
            let err = bad.parse::<Reward>().unwrap_err();
            assert!(matches!(err, ScribepoolError::Format { .. }), "{bad:?}");
        }
    }

    #[test]
    fn test_copies_must_be_positive() {
        let mut assignment = AssignmentConfig::default();
        assignment.set_raw(AssignmentField::Copies, "0").unwrap();
        assert!(matches!(
            assignment.copies().unwrap_err(),
            ScribepoolError::Format { .. }
        ));
    }

    #[test]
    fn test_load_and_save_round_trip() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(REGULAR.as_bytes()).unwrap();

        let mut config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.path(), Some(temp_file.path()));
        config.assignment.set_deadline("45m".parse().unwrap());

        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("config.toml");
        config.save(&path).unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.assignment.deadline().unwrap().seconds(), 45 * 60);
        assert_eq!(reloaded.assignment.qualify().unwrap().len(), 2);
        assert_eq!(
            reloaded.object_store.as_ref().unwrap().bucket(),
            Some("scribepool-test")
        );
    }

    #[test]
    fn test_missing_file_is_typed_error() {
        let missing_path = Path::new("/tmp/nonexistent_scribepool_config_12345.toml");
        assert!(matches!(
            Config::load(missing_path).unwrap_err(),
            ScribepoolError::ConfigFileNotFound { .. }
        ));
        let config = Config::load_or_default(missing_path).unwrap();
        assert!(config.object_store.is_none());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[assignment\nreward = \"broken").unwrap();
        assert!(matches!(
            Config::load_or_default(temp_file.path()).unwrap_err(),
            ScribepoolError::Config(_)
        ));
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        set_env("SCRIBEPOOL_LOCAL", "/tmp/projects");
        set_env("SCRIBEPOOL_TEMPLATES", "");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.local(), Some(PathBuf::from("/tmp/projects")));
        assert_eq!(config.templates(), None);

        remove_env("SCRIBEPOOL_LOCAL");
        remove_env("SCRIBEPOOL_TEMPLATES");
    }
}
