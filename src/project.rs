//! On-disk project state: one CSV row per audio chunk.
//!
//! A project directory looks like:
//!
//! ```text
//! <project>/
//!   data/
//!     id.txt                  stable project identifier
//!     assignment.csv          production record table
//!     sandbox-assignment.csv  sandbox copy, created on first sandbox run
//! ```
//!
//! The record table is owned by the [`Project`] and rewritten whole on every
//! [`RecordStore::save`], through a temporary file in the same directory so a
//! crash never leaves a half-written table behind.

use crate::defaults;
use crate::error::{Result, ScribepoolError};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Columns every record table carries, in on-disk order.
pub const STABLE_COLUMNS: [&str; 7] = [
    "id",
    "local_asset_path",
    "remote_asset_url",
    "asset_upload_status",
    "assignment_url",
    "assignment_upload_status",
    "task_id",
];

/// Upload state of one asset.
///
/// `Maybe` records a put that was started but never confirmed. It is never
/// treated as uploaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadStatus {
    #[default]
    No,
    Maybe,
    Yes,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Maybe => "maybe",
            Self::Yes => "yes",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = ScribepoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "no" => Ok(Self::No),
            "maybe" => Ok(Self::Maybe),
            "yes" => Ok(Self::Yes),
            other => Err(ScribepoolError::format(format!(
                "unknown upload status '{other}' (expected no, maybe or yes)"
            ))),
        }
    }
}

/// The two assets uploaded for every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    /// The audio chunk itself.
    Audio,
    /// The rendered assignment page workers open.
    Assignment,
}

impl Asset {
    pub const ALL: [Asset; 2] = [Asset::Audio, Asset::Assignment];

    pub fn name(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Assignment => "assignment",
        }
    }
}

/// One work unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub local_asset_path: String,
    pub remote_asset_url: String,
    pub asset_upload_status: UploadStatus,
    pub assignment_url: String,
    pub assignment_upload_status: UploadStatus,
    pub task_id: String,
    /// Columns this crate does not know about, as `(header, value)`.
    pub extra: Vec<(String, String)>,
}

impl Record {
    pub fn new(id: impl Into<String>, local_asset_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            local_asset_path: local_asset_path.into(),
            ..Self::default()
        }
    }

    pub fn status(&self, asset: Asset) -> UploadStatus {
        match asset {
            Asset::Audio => self.asset_upload_status,
            Asset::Assignment => self.assignment_upload_status,
        }
    }

    pub fn set_status(&mut self, asset: Asset, status: UploadStatus) {
        match asset {
            Asset::Audio => self.asset_upload_status = status,
            Asset::Assignment => self.assignment_upload_status = status,
        }
    }

    pub fn url(&self, asset: Asset) -> &str {
        match asset {
            Asset::Audio => &self.remote_asset_url,
            Asset::Assignment => &self.assignment_url,
        }
    }

    pub fn set_url(&mut self, asset: Asset, url: impl Into<String>) {
        match asset {
            Asset::Audio => self.remote_asset_url = url.into(),
            Asset::Assignment => self.assignment_url = url.into(),
        }
    }

    /// Some asset is not confirmed uploaded.
    pub fn needs_upload(&self) -> bool {
        Asset::ALL
            .iter()
            .any(|asset| self.status(*asset) != UploadStatus::Yes)
    }

    /// No marketplace task is recorded for this row.
    pub fn is_unassigned(&self) -> bool {
        self.task_id.trim().is_empty()
    }

    /// Value of any column by header name.
    pub fn field(&self, column: &str) -> Option<&str> {
        match column {
            "id" => Some(&self.id),
            "local_asset_path" => Some(&self.local_asset_path),
            "remote_asset_url" => Some(&self.remote_asset_url),
            "asset_upload_status" => Some(self.asset_upload_status.as_str()),
            "assignment_url" => Some(&self.assignment_url),
            "assignment_upload_status" => Some(self.assignment_upload_status.as_str()),
            "task_id" => Some(&self.task_id),
            other => self
                .extra
                .iter()
                .find(|(header, _)| header == other)
                .map(|(_, value)| value.as_str()),
        }
    }

    /// Set an extra column, adding it if the row does not have it yet.
    pub fn set_extra(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.extra.iter_mut().find(|(header, _)| *header == column) {
            Some((_, existing)) => *existing = value,
            None => self.extra.push((column, value)),
        }
    }

    fn from_csv(headers: &[String], row: &csv::StringRecord, line: u64) -> Result<Self> {
        let mut record = Record::default();
        for (header, value) in headers.iter().zip(row.iter()) {
            let status = |v: &str| {
                v.parse::<UploadStatus>()
                    .map_err(|e| e.context(&format!("line {line}, column {header}")))
            };
            match header.as_str() {
                "id" => record.id = value.to_string(),
                "local_asset_path" => record.local_asset_path = value.to_string(),
                "remote_asset_url" => record.remote_asset_url = value.to_string(),
                "asset_upload_status" => record.asset_upload_status = status(value)?,
                "assignment_url" => record.assignment_url = value.to_string(),
                "assignment_upload_status" => record.assignment_upload_status = status(value)?,
                "task_id" => record.task_id = value.to_string(),
                _ => record.extra.push((header.clone(), value.to_string())),
            }
        }
        if record.id.trim().is_empty() {
            return Err(ScribepoolError::format(format!("line {line}: row has no id")));
        }
        Ok(record)
    }

    fn to_csv(&self, extra_columns: &[String]) -> Vec<String> {
        let mut row: Vec<String> = STABLE_COLUMNS
            .iter()
            .map(|column| self.field(column).unwrap_or_default().to_string())
            .collect();
        row.extend(
            extra_columns
                .iter()
                .map(|column| self.field(column).unwrap_or_default().to_string()),
        );
        row
    }
}

/// A project directory with a `data/id.txt`.
#[derive(Debug, Clone)]
pub struct Project {
    dir: PathBuf,
    id: String,
}

impl Project {
    /// Open an existing project.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let id_path = dir.join(defaults::DATA_DIR).join(defaults::ID_FILE);
        let id = match fs::read_to_string(&id_path) {
            Ok(contents) => contents.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ScribepoolError::NotAProject {
                    path: dir.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        if id.is_empty() {
            return Err(ScribepoolError::NotAProject {
                path: dir.display().to_string(),
            });
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            id,
        })
    }

    /// Populate a new project: one row per audio chunk, in the given order.
    ///
    /// Row ids are the chunk file stems, so they must be unique.
    pub fn create(dir: impl AsRef<Path>, id: &str, audio_files: &[PathBuf]) -> Result<Self> {
        let dir = dir.as_ref();
        let id = id.trim();
        if id.is_empty() || id.contains(char::is_whitespace) {
            return Err(ScribepoolError::argument(format!(
                "project id '{id}' must be a single non-empty word"
            )));
        }
        let data_dir = dir.join(defaults::DATA_DIR);
        if data_dir.join(defaults::ID_FILE).exists() {
            return Err(ScribepoolError::argument(format!(
                "{} is already a project",
                dir.display()
            )));
        }

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(audio_files.len());
        for path in audio_files {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ScribepoolError::argument(format!("'{}' has no file name", path.display()))
                })?;
            if !seen.insert(stem.to_string()) {
                return Err(ScribepoolError::argument(format!(
                    "two audio chunks share the name '{stem}'"
                )));
            }
            records.push(Record::new(stem, path.to_string_lossy()));
        }

        fs::create_dir_all(&data_dir)?;
        let store = RecordStore {
            path: data_dir.join(defaults::RECORD_TABLE),
            extra_columns: Vec::new(),
            records,
        };
        store.save()?;
        // id.txt last: it is what makes the directory a project.
        fs::write(data_dir.join(defaults::ID_FILE), format!("{id}\n"))?;
        debug!(project = id, rows = store.len(), "created project");

        Ok(Self {
            dir: dir.to_path_buf(),
            id: id.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory name, which is how users refer to the project.
    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.clone())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.join(defaults::DATA_DIR)
    }

    /// Copy the table a run would use into `scratch`, for a run whose
    /// results must not reach this project. Audio paths become absolute.
    pub fn scratch_copy(&self, scratch: &Path, sandbox: bool) -> Result<Project> {
        let data_dir = self.data_dir();
        let table = if sandbox {
            defaults::SANDBOX_RECORD_TABLE
        } else {
            defaults::RECORD_TABLE
        };
        let source = data_dir.join(table);
        let mut store = if source.exists() {
            RecordStore::load(source)?
        } else {
            RecordStore::load(data_dir.join(defaults::RECORD_TABLE))?
        };
        for record in &mut store.records {
            let audio = Path::new(&record.local_asset_path);
            if !record.local_asset_path.is_empty() && audio.is_relative() {
                record.local_asset_path = self.dir.join(audio).to_string_lossy().into_owned();
            }
        }

        let dir = scratch.join(self.name());
        let copy_data = dir.join(defaults::DATA_DIR);
        fs::create_dir_all(&copy_data)?;
        store.path = copy_data.join(table);
        store.save()?;
        fs::write(copy_data.join(defaults::ID_FILE), format!("{}\n", self.id))?;
        Ok(Project {
            dir,
            id: self.id.clone(),
        })
    }

    /// Load the record table for a production or sandbox run.
    ///
    /// The sandbox table is seeded from the production one the first time.
    pub fn records(&self, sandbox: bool) -> Result<RecordStore> {
        let main = self.data_dir().join(defaults::RECORD_TABLE);
        if !sandbox {
            return RecordStore::load(main);
        }

        let path = self.data_dir().join(defaults::SANDBOX_RECORD_TABLE);
        if !path.exists() {
            let mut seeded = RecordStore::load(&main)?;
            seeded.path = path.clone();
            seeded.save()?;
            debug!(path = %path.display(), "seeded sandbox record table");
            return Ok(seeded);
        }
        RecordStore::load(path)
    }
}

/// Ordered, id-keyed rows of one record table.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    extra_columns: Vec<String>,
    records: Vec<Record>,
}

impl RecordStore {
    /// Read a table. A missing file is an empty table.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self {
            path,
            extra_columns: Vec::new(),
            records: Vec::new(),
        };
        if !store.path.exists() {
            return Ok(store);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&store.path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        store.extra_columns = headers
            .iter()
            .filter(|h| !STABLE_COLUMNS.contains(&h.as_str()))
            .cloned()
            .collect();

        let mut seen = HashSet::new();
        for (index, row) in reader.records().enumerate() {
            let row = row?;
            let line = row.position().map_or(index as u64 + 2, |p| p.line());
            let record = Record::from_csv(&headers, &row, line)?;
            if !seen.insert(record.id.clone()) {
                return Err(ScribepoolError::format(format!(
                    "{}: duplicate row id '{}'",
                    store.path.display(),
                    record.id
                )));
            }
            store.records.push(record);
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Ids of the rows matching `predicate`, in table order.
    pub fn select(&self, predicate: impl Fn(&Record) -> bool) -> Vec<String> {
        self.records
            .iter()
            .filter(|&record| predicate(record))
            .map(|record| record.id.clone())
            .collect()
    }

    pub fn needs_upload(&self) -> Vec<String> {
        self.select(Record::needs_upload)
    }

    pub fn unassigned(&self) -> Vec<String> {
        self.select(Record::is_unassigned)
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        self.records.iter_mut().find(|record| record.id == id)
    }

    /// Replace the row with the same id, or append a new one.
    pub fn upsert(&mut self, record: Record) {
        for (column, _) in &record.extra {
            if !self.extra_columns.contains(column) {
                self.extra_columns.push(column.clone());
            }
        }
        match self.get_mut(&record.id) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    /// Every URL the table records for an uploaded or attempted asset.
    pub fn recorded_urls(&self) -> Vec<&str> {
        self.records
            .iter()
            .flat_map(|record| Asset::ALL.map(|asset| record.url(asset)))
            .filter(|url| !url.is_empty())
            .collect()
    }

    /// Rewrite the table atomically.
    pub fn save(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = csv::Writer::from_writer(temp.as_file_mut());
            let mut header: Vec<&str> = STABLE_COLUMNS.to_vec();
            header.extend(self.extra_columns.iter().map(String::as_str));
            writer.write_record(&header)?;
            for record in &self.records {
                writer.write_record(record.to_csv(&self.extra_columns))?;
            }
            writer.flush()?;
        }
        temp.as_file_mut().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
