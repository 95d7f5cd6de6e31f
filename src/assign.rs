//! Assign every pending chunk of a project as a marketplace task.
//!
//! One run goes through three steps:
//!
//! 1. Preflight, with no network: https base, recorded URLs under the
//!    current remote, a non-empty table, a fully parseable assignment config.
//! 2. Upload each row without a task id: its audio and rendered page,
//!    persisting the upload status before and after every put.
//! 3. Create one task per row. If a create fails, the tasks created by this
//!    run are disabled again in reverse order and the run fails. Task ids
//!    already written to the table stay there.

use crate::config::Config;
use crate::error::{Result, ScribepoolError};
use crate::marketplace::{Marketplace, Task, TaskOptions};
use crate::project::{Asset, Project, Record, RecordStore, UploadStatus};
use crate::remote::{self, Remote, Stream, ensure_https, ensure_recorded_urls_match, sanitize_name};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything one run needs, built once at start-up and passed down.
pub struct RunContext {
    pub config: Config,
    pub remote: Box<dyn Remote>,
    pub marketplace: Box<dyn Marketplace>,
    /// Use the sandbox record table and tell the marketplace it is a test.
    pub sandbox: bool,
}

impl RunContext {
    pub fn new(config: Config, remote: Box<dyn Remote>, marketplace: Box<dyn Marketplace>) -> Self {
        Self {
            config,
            remote,
            marketplace,
            sandbox: false,
        }
    }

    /// Build the remote the config describes.
    pub fn from_config(config: Config, marketplace: Box<dyn Marketplace>) -> Result<Self> {
        let remote = remote::from_config(&config)?;
        Ok(Self::new(config, remote, marketplace))
    }

    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }
}

/// Where one row is in the assignment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Pending,
    Uploading,
    Uploaded,
    Submitting,
    Submitted,
    FailedRolledBack,
}

impl RowState {
    /// State as far as the record table can tell.
    pub fn of(record: &Record) -> Self {
        if !record.is_unassigned() {
            Self::Submitted
        } else if !record.needs_upload() {
            Self::Uploaded
        } else if Asset::ALL
            .iter()
            .any(|asset| record.status(*asset) == UploadStatus::Maybe)
        {
            Self::Uploading
        } else {
            Self::Pending
        }
    }
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
            Self::FailedRolledBack => "failed, rolled back",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignReport {
    /// Rows in the table.
    pub total: usize,
    /// Rows that got a task in this run.
    pub submitted: usize,
    /// Assets uploaded in this run.
    pub uploaded: usize,
    pub task_ids: Vec<String>,
}

impl fmt::Display for AssignReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Assigned {} / {}", self.submitted, self.total)
    }
}

/// Assignment page with `{{column}}` placeholders.
///
/// Placeholders name record columns, extra columns included. Values are
/// HTML-escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    source: String,
}

impl Template {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        Ok(Self::new(path.display().to_string(), source))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, record: &Record) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        let mut rest = self.source.as_str();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                ScribepoolError::format(format!("template '{}' has an unclosed '{{{{'", self.name))
            })?;
            let column = after[..end].trim();
            let value = record.field(column).ok_or_else(|| {
                ScribepoolError::argument(format!(
                    "template '{}' refers to unknown column '{column}'",
                    self.name
                ))
            })?;
            out.push_str(&escape_html(value));
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Run the whole pipeline over one project.
pub async fn assign(project: &Project, template: &Template, ctx: &RunContext) -> Result<AssignReport> {
    let remote = ctx.remote.as_ref();
    let marketplace = ctx.marketplace.as_ref();

    ensure_https(remote)?;
    let mut store = project.records(ctx.sandbox)?;
    ensure_recorded_urls_match(remote, store.recorded_urls())?;
    if store.is_empty() {
        return Err(ScribepoolError::argument(format!(
            "No data in {}",
            store.path().display()
        )));
    }
    ctx.config.assignment.validate()?;
    let options = TaskOptions::from_config(project.id(), &ctx.config.assignment, ctx.sandbox)?;

    let pending = store.unassigned();
    if pending.is_empty() {
        return Err(ScribepoolError::argument(format!(
            "All {} rows of {} are already assigned",
            store.len(),
            project.name()
        )));
    }
    info!(
        project = %project.name(),
        pending = pending.len(),
        total = store.len(),
        sandbox = ctx.sandbox,
        "Assigning..."
    );

    let mut uploaded = 0;
    for id in &pending {
        uploaded += upload_row(project, template, remote, &mut store, id).await?;
    }

    let mut created: Vec<Task> = Vec::with_capacity(pending.len());
    for id in &pending {
        let payload = row(&store, id)?.assignment_url.clone();
        debug!(row = %id, state = %RowState::Submitting);

        let task = match marketplace.create_task(&payload, &options).await {
            Ok(task) => task,
            Err(e) => return Err(roll_back(marketplace, &created, e).await),
        };
        created.push(task.clone());
        row_mut(&mut store, id)?.task_id = task.id.clone();
        if let Err(e) = store.save() {
            return Err(roll_back(marketplace, &created, e).await);
        }
        debug!(row = %id, task = %task.id, state = %RowState::Submitted);
        info!("Assigned {} / {}", created.len(), pending.len());
    }

    Ok(AssignReport {
        total: store.len(),
        submitted: created.len(),
        uploaded,
        task_ids: created.into_iter().map(|task| task.id).collect(),
    })
}

/// Upload whichever of the row's assets are not confirmed yet.
///
/// Returns the number of assets uploaded.
async fn upload_row(
    project: &Project,
    template: &Template,
    remote: &dyn Remote,
    store: &mut RecordStore,
    id: &str,
) -> Result<usize> {
    let mut uploaded = 0;
    for asset in Asset::ALL {
        let record = row(store, id)?;
        if record.status(asset) == UploadStatus::Yes {
            continue;
        }
        let (name, stream) = match asset {
            Asset::Audio => audio_upload(project, record)?,
            Asset::Assignment => page_upload(project, template, record)?,
        };
        debug!(row = %id, asset = asset.name(), name = %name, state = %RowState::Uploading);

        let record = row_mut(store, id)?;
        record.set_url(asset, remote.url_for(&name));
        record.set_status(asset, UploadStatus::Maybe);
        store.save()?;

        let urls = match remote.put(&[stream], Some(&[name])).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!(row = %id, asset = asset.name(), error = %e, "upload failed; leaving status 'maybe'");
                store.save()?;
                return Err(e);
            }
        };

        let record = row_mut(store, id)?;
        if let Some(url) = urls.into_iter().next() {
            record.set_url(asset, url);
        }
        record.set_status(asset, UploadStatus::Yes);
        store.save()?;
        uploaded += 1;
    }
    if let Ok(record) = row(store, id) {
        debug!(row = %id, state = %RowState::of(record));
    }
    Ok(uploaded)
}

fn audio_upload(project: &Project, record: &Record) -> Result<(String, Stream)> {
    let mut path = PathBuf::from(&record.local_asset_path);
    if path.is_relative() {
        path = project.dir().join(path);
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            ScribepoolError::argument(format!(
                "row '{}' has no audio file (local_asset_path is '{}')",
                record.id, record.local_asset_path
            ))
        })?;
    let stream = Stream::from_path(&path)?;
    Ok((sanitize_name(&format!("{}-{file_name}", project.id())), stream))
}

fn page_upload(project: &Project, template: &Template, record: &Record) -> Result<(String, Stream)> {
    let page = template.render(record)?;
    let name = sanitize_name(&format!("{}-{}.html", project.id(), record.id));
    Ok((name, Stream::from_bytes(page)))
}

/// Disable `created` newest first. Disable failures are logged, never raised.
async fn roll_back(
    marketplace: &dyn Marketplace,
    created: &[Task],
    error: ScribepoolError,
) -> ScribepoolError {
    warn!(error = %error, "Assignment failed");
    if created.is_empty() {
        return error;
    }
    warn!("Rolling back {} assignments...", created.len());
    for task in created.iter().rev() {
        match marketplace.disable_task(task).await {
            Ok(()) => debug!(task = %task.id, state = %RowState::FailedRolledBack),
            Err(e) => warn!(task = %task.id, error = %e, "could not disable task during rollback"),
        }
    }
    error
}

fn row<'a>(store: &'a RecordStore, id: &str) -> Result<&'a Record> {
    store.get(id).ok_or_else(|| missing_row(id))
}

fn row_mut<'a>(store: &'a mut RecordStore, id: &str) -> Result<&'a mut Record> {
    store.get_mut(id).ok_or_else(|| missing_row(id))
}

fn missing_row(id: &str) -> ScribepoolError {
    ScribepoolError::Other(format!("row '{id}' vanished from the record table"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        let mut record = Record::new("c01", "/audio/c01.mp3");
        record.remote_asset_url = "https://example.com/up/p-c01.mp3".to_string();
        record.set_extra("speaker", "Ann & \"Bob\"");
        record
    }

    #[test]
    fn test_render_substitutes_and_escapes() {
        let template = Template::new(
            "t",
            "<audio src=\"{{remote_asset_url}}\"></audio><p>{{ speaker }}</p>{{id}}",
        );
        assert_eq!(
            template.render(&record()).unwrap(),
            "<audio src=\"https://example.com/up/p-c01.mp3\"></audio>\
             <p>Ann &amp; &quot;Bob&quot;</p>c01"
        );
    }

    #[test]
    fn test_render_without_placeholders_is_identity() {
        let template = Template::new("t", "plain <b>page</b>");
        assert_eq!(template.render(&record()).unwrap(), "plain <b>page</b>");
    }

    #[test]
    fn test_render_unknown_column() {
        let err = Template::new("t", "{{nope}}").render(&record()).unwrap_err();
        assert!(matches!(err, ScribepoolError::Argument { .. }));
        assert!(err.to_string().contains("unknown column 'nope'"));
    }

    #[test]
    fn test_render_unclosed_placeholder() {
        let err = Template::new("t", "a {{id").render(&record()).unwrap_err();
        assert!(matches!(err, ScribepoolError::Format { .. }));
        assert!(err.to_string().contains("unclosed '{{'"));
    }

    #[test]
    fn test_row_state_of() {
        let mut record = Record::new("a", "/a.mp3");
        assert_eq!(RowState::of(&record), RowState::Pending);
        record.set_status(Asset::Audio, UploadStatus::Maybe);
        assert_eq!(RowState::of(&record), RowState::Uploading);
        record.set_status(Asset::Audio, UploadStatus::Yes);
        record.set_status(Asset::Assignment, UploadStatus::Yes);
        assert_eq!(RowState::of(&record), RowState::Uploaded);
        record.task_id = "T1".to_string();
        assert_eq!(RowState::of(&record), RowState::Submitted);
    }

    #[test]
    fn test_report_display() {
        let report = AssignReport {
            total: 3,
            submitted: 2,
            ..AssignReport::default()
        };
        assert_eq!(report.to_string(), "Assigned 2 / 3");
    }

    #[test]
    fn test_page_name_is_a_valid_remote_name() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::create(dir.path().join("p"), "proj 1", &[]);
        assert!(project.is_err());

        let project = Project::create(dir.path().join("p"), "proj1", &[]).unwrap();
        let (name, _) = page_upload(&project, &Template::new("t", "x"), &Record::new("c 01", "")).unwrap();
        assert_eq!(name, "proj1-c_01.html");
    }
}
