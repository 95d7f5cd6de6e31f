//! Remote file storage for project assets.
//!
//! Two unrelated backends sit behind one contract:
//! - [`S3Remote`]: an S3-compatible bucket, spoken to over its REST API
//! - [`SftpRemote`]: a directory on an SFTP host that a web server exposes
//!
//! Both upload streams and hand back public URLs, remove by basename, and
//! build URLs deterministically from a base address.

pub mod command;
pub mod s3;
pub mod sftp;

pub use command::{CommandExecutor, SystemCommandExecutor};
pub use s3::S3Remote;
pub use sftp::SftpRemote;

use crate::config::Config;
use crate::defaults;
use crate::error::{Result, ScribepoolError};
use async_trait::async_trait;
use rand::Rng;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use url::Url;

/// Bytes to upload, plus the file name they came from (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    data: Vec<u8>,
    source_name: Option<String>,
}

impl Stream {
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            source_name: None,
        }
    }

    /// Read a local file. Its basename seeds the derived remote name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self {
            data,
            source_name: path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string),
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }
}

/// Uniform put/remove contract over a remote file store.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Backend tag used in error messages (`S3`, `SFTP`).
    fn backend(&self) -> &'static str;

    /// Public address that uploaded names are appended to.
    fn base_url(&self) -> &Url;

    /// Upload every stream and return one URL per stream, in input order.
    ///
    /// When `names` is `None`, a unique name is derived for each stream.
    /// A failure on any stream fails the whole call.
    async fn put(&self, streams: &[Stream], names: Option<&[String]>) -> Result<Vec<String>>;

    /// Delete by basename. Accepts bare names or URLs returned by [`Remote::put`].
    /// Names that do not exist are ignored.
    async fn remove(&self, names_or_urls: &[String]) -> Result<()>;

    /// Public URL for `name`. Pure function of the base address and the name.
    fn url_for(&self, name: &str) -> String {
        let mut url = self.base_url().clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(name);
        }
        url.to_string()
    }

    fn host(&self) -> Option<String> {
        self.base_url().host_str().map(str::to_string)
    }

    fn path(&self) -> String {
        self.base_url().path().to_string()
    }
}

/// Share one remote between the pipeline and whoever else inspects it.
#[async_trait]
impl<T: Remote + ?Sized> Remote for Arc<T> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    fn base_url(&self) -> &Url {
        (**self).base_url()
    }

    async fn put(&self, streams: &[Stream], names: Option<&[String]>) -> Result<Vec<String>> {
        (**self).put(streams, names).await
    }

    async fn remove(&self, names_or_urls: &[String]) -> Result<()> {
        (**self).remove(names_or_urls).await
    }

    fn url_for(&self, name: &str) -> String {
        (**self).url_for(name)
    }

    fn host(&self) -> Option<String> {
        (**self).host()
    }

    fn path(&self) -> String {
        (**self).path()
    }
}

/// Pick the backend the config describes: the object store when it names a
/// bucket, otherwise a complete transfer section.
pub fn from_config(config: &Config) -> Result<Box<dyn Remote>> {
    if let Some(store) = config.object_store.as_ref().filter(|s| s.bucket().is_some()) {
        return Ok(Box::new(S3Remote::from_config(store)?));
    }
    if let Some(transfer) = config.transfer.as_ref().filter(|t| t.is_complete()) {
        return Ok(Box::new(SftpRemote::from_config(transfer)?));
    }
    Err(ScribepoolError::ConfigInvalidValue {
        key: "remote".to_string(),
        message: "need a [remote-object-store] bucket or a complete [remote-transfer] section"
            .to_string(),
    })
}

/// In-memory stand-in for the configured remote, serving from the same
/// public base so the https and recorded-URL checks still apply.
pub fn rehearsal_from_config(config: &Config) -> Result<MemoryRemote> {
    let configured = from_config(config)?;
    MemoryRemote::new(configured.base_url().as_str())
}

/// Parse and normalize a public base URL.
pub(crate) fn parse_base_url(key: &str, raw: &str) -> Result<Url> {
    let trimmed = raw.trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| ScribepoolError::ConfigInvalidValue {
        key: key.to_string(),
        message: format!("'{raw}' is not a URL: {e}"),
    })?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(ScribepoolError::ConfigInvalidValue {
            key: key.to_string(),
            message: format!("'{raw}' has no host"),
        });
    }
    Ok(url)
}

/// Last path component of a URL, or the input itself when it is a bare name.
pub fn url_basename(name_or_url: &str) -> &str {
    let without_query = name_or_url
        .split(['?', '#'])
        .next()
        .unwrap_or(name_or_url);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(without_query)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

/// Replace characters that are unsafe in a remote name with `_`.
pub fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .map(|c| if is_name_char(c) { c } else { '_' })
        .collect()
}

fn random_letters(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(rng.gen_range(b'A'..=b'Z')))
        .collect()
}

/// Derive a remote name for a stream: `<stem>.<random><ext>` when it came
/// from a file, random letters otherwise.
pub fn derive_name(stream: &Stream) -> String {
    match stream.source_name() {
        Some(source) => {
            let source = sanitize_name(source);
            let (stem, ext) = match source.rfind('.') {
                Some(dot) if dot > 0 => source.split_at(dot),
                _ => (source.as_str(), ""),
            };
            format!(
                "{stem}.{}{ext}",
                random_letters(defaults::RANDOM_SUFFIX_LEN)
            )
        }
        None => random_letters(defaults::RANDOM_SUFFIX_LEN * 2 + 4),
    }
}

/// Validate caller-supplied names or derive fresh ones, before any I/O.
pub(crate) fn resolve_names(streams: &[Stream], names: Option<&[String]>) -> Result<Vec<String>> {
    match names {
        None => Ok(streams.iter().map(derive_name).collect()),
        Some(names) => {
            if names.len() != streams.len() {
                return Err(ScribepoolError::argument(format!(
                    "got {} names for {} streams",
                    names.len(),
                    streams.len()
                )));
            }
            for name in names {
                if name.is_empty() || !name.chars().all(is_name_char) || name.starts_with('.') {
                    return Err(ScribepoolError::argument(format!(
                        "'{name}' is not a valid remote name (letters, digits, '.', '-', '_')"
                    )));
                }
            }
            Ok(names.to_vec())
        }
    }
}

/// Reject a base URL that marketplace workers would load over plain HTTP.
pub fn ensure_https(remote: &dyn Remote) -> Result<()> {
    let base = remote.base_url();
    if base.scheme() != "https" {
        return Err(ScribepoolError::ConfigInvalidValue {
            key: format!("{} url", remote.backend()),
            message: format!(
                "'{base}' must begin with 'https' to be used for assignment links"
            ),
        });
    }
    Ok(())
}

/// Check that URLs recorded earlier point under this remote's base.
///
/// A different scheme, host, port or path prefix means the current config
/// describes another destination than the one the project was uploaded to.
pub fn ensure_recorded_urls_match<'a>(
    remote: &dyn Remote,
    urls: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let base = remote.base_url();
    let base_path = base.path().trim_end_matches('/');
    for recorded in urls {
        let matches = Url::parse(recorded).is_ok_and(|url| {
            url.scheme() == base.scheme()
                && url.host_str() == base.host_str()
                && url.port_or_known_default() == base.port_or_known_default()
                && url
                    .path()
                    .strip_prefix(base_path)
                    .is_some_and(|rest| rest.starts_with('/'))
        });
        if !matches {
            return Err(ScribepoolError::ConfigMismatch {
                message: format!(
                    "Remote URLs don't look right: '{recorded}' is not under '{base}'. \
                     Check the remote settings in your config."
                ),
            });
        }
    }
    Ok(())
}

/// In-memory remote for tests and dry runs.
///
/// Records every `put`, and can be told to fail from the nth stream on.
#[derive(Debug)]
pub struct MemoryRemote {
    base: Url,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    put_log: Mutex<Vec<String>>,
    fail_after: Mutex<Option<usize>>,
}

impl MemoryRemote {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base: parse_base_url("memory url", base_url)?,
            files: Mutex::new(BTreeMap::new()),
            put_log: Mutex::new(Vec::new()),
            fail_after: Mutex::new(None),
        })
    }

    /// Fail every stream once `count` more streams have been stored.
    pub fn fail_after(self, count: usize) -> Self {
        self.set_fail_after(Some(count));
        self
    }

    pub fn set_fail_after(&self, count: Option<usize>) {
        if let Ok(mut fail_after) = self.fail_after.lock() {
            *fail_after = count;
        }
    }

    /// Names passed to `put`, in call order.
    pub fn put_log(&self) -> Vec<String> {
        self.put_log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().ok()?.get(name).cloned()
    }

    /// Whether `url` currently resolves to a stored file.
    pub fn is_reachable(&self, url: &str) -> bool {
        url.starts_with(self.base.as_str().trim_end_matches('/'))
            && self.contents(url_basename(url)).is_some()
    }

    fn poisoned() -> ScribepoolError {
        ScribepoolError::RemoteOperation {
            backend: "memory",
            message: "state lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn base_url(&self) -> &Url {
        &self.base
    }

    async fn put(&self, streams: &[Stream], names: Option<&[String]>) -> Result<Vec<String>> {
        let names = resolve_names(streams, names)?;
        let mut fail_after = self.fail_after.lock().map_err(|_| Self::poisoned())?;
        if let Some(remaining) = *fail_after {
            if remaining < streams.len() {
                *fail_after = Some(0);
                return Err(ScribepoolError::RemoteOperation {
                    backend: "memory",
                    message: format!("simulated failure uploading '{}'", names[remaining]),
                });
            }
            *fail_after = Some(remaining - streams.len());
        }
        drop(fail_after);

        let mut files = self.files.lock().map_err(|_| Self::poisoned())?;
        let mut log = self.put_log.lock().map_err(|_| Self::poisoned())?;
        for (stream, name) in streams.iter().zip(&names) {
            files.insert(name.clone(), stream.data().to_vec());
            log.push(name.clone());
        }
        Ok(names.iter().map(|name| self.url_for(name)).collect())
    }

    async fn remove(&self, names_or_urls: &[String]) -> Result<()> {
        let mut files = self.files.lock().map_err(|_| Self::poisoned())?;
        for item in names_or_urls {
            files.remove(url_basename(item));
        }
        Ok(())
    }
}
