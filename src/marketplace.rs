//! The labor marketplace, as the assignment pipeline sees it.
//!
//! Only three calls are needed: create a task, list a project's live tasks,
//! and disable a task. The HTTP client for a real marketplace lives outside
//! this crate and plugs in through [`Marketplace`].

use crate::config::{AssignmentConfig, Reward};
use crate::error::{Result, ScribepoolError};
use crate::qualification::Qualification;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

/// A task as the marketplace knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub project_id: String,
}

/// Everything a marketplace needs besides the rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    /// Tags the task so [`Marketplace::list_tasks_for_project`] can find it.
    pub project_id: String,
    pub reward: Reward,
    pub currency: String,
    pub keywords: Vec<String>,
    pub deadline_secs: u64,
    pub lifetime_secs: u64,
    pub approval_secs: u64,
    pub qualifications: Vec<Qualification>,
    pub copies: u32,
    pub sandbox: bool,
}

impl TaskOptions {
    /// Collect the typed assignment settings. Fails on the first malformed field.
    pub fn from_config(
        project_id: &str,
        assignment: &AssignmentConfig,
        sandbox: bool,
    ) -> Result<Self> {
        Ok(Self {
            project_id: project_id.to_string(),
            reward: assignment.reward()?,
            currency: assignment.currency().to_string(),
            keywords: assignment.keywords().to_vec(),
            deadline_secs: assignment.deadline()?.seconds(),
            lifetime_secs: assignment.lifetime()?.seconds(),
            approval_secs: assignment.approval()?.seconds(),
            qualifications: assignment.qualify()?.to_vec(),
            copies: assignment.copies()?,
            sandbox,
        })
    }
}

#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Publish one task whose page is `payload` (the assignment page URL).
    async fn create_task(&self, payload: &str, options: &TaskOptions) -> Result<Task>;

    /// Live (not disabled, not expired) tasks tagged with `project_id`.
    async fn list_tasks_for_project(&self, project_id: &str) -> Result<Vec<Task>>;

    /// Withdraw a task so no worker can accept it.
    async fn disable_task(&self, task: &Task) -> Result<()>;
}

#[async_trait]
impl<T: Marketplace + ?Sized> Marketplace for Arc<T> {
    async fn create_task(&self, payload: &str, options: &TaskOptions) -> Result<Task> {
        (**self).create_task(payload, options).await
    }

    async fn list_tasks_for_project(&self, project_id: &str) -> Result<Vec<Task>> {
        (**self).list_tasks_for_project(project_id).await
    }

    async fn disable_task(&self, task: &Task) -> Result<()> {
        (**self).disable_task(task).await
    }
}

/// One task created on a [`MockMarketplace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTask {
    pub task: Task,
    pub payload: String,
    pub options: TaskOptions,
    pub disabled: bool,
}

#[derive(Debug, Default)]
struct MockState {
    tasks: Vec<MockTask>,
    create_calls: usize,
    fail_create_on: Option<usize>,
    fail_disable: bool,
    disable_log: Vec<String>,
}

/// In-memory marketplace for tests and embedding.
///
/// Clones share state, so a test can keep one handle and give the other to
/// the pipeline.
#[derive(Debug, Clone, Default)]
pub struct MockMarketplace {
    state: Arc<Mutex<MockState>>,
}

impl MockMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`th `create_task` call (1-based), counting from now.
    pub fn fail_create_on(self, n: usize) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.fail_create_on = Some(state.create_calls + n);
        }
        self
    }

    /// Make every `disable_task` call fail.
    pub fn fail_disable(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.fail_disable = true;
        }
        self
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_create_on = None;
            state.fail_disable = false;
        }
    }

    /// Every task ever created, including disabled ones, in creation order.
    pub fn tasks(&self) -> Vec<MockTask> {
        self.state
            .lock()
            .map(|state| state.tasks.clone())
            .unwrap_or_default()
    }

    /// Ids passed to `disable_task`, in call order.
    pub fn disable_log(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.disable_log.clone())
            .unwrap_or_default()
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().map(|state| state.create_calls).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>> {
        self.state.lock().map_err(|_| ScribepoolError::Marketplace {
            message: "mock marketplace state poisoned".to_string(),
        })
    }
}

#[async_trait]
impl Marketplace for MockMarketplace {
    async fn create_task(&self, payload: &str, options: &TaskOptions) -> Result<Task> {
        let mut state = self.lock()?;
        state.create_calls += 1;
        if state.fail_create_on == Some(state.create_calls) {
            return Err(ScribepoolError::Marketplace {
                message: format!("simulated failure creating task #{}", state.create_calls),
            });
        }

        let task = Task {
            id: format!("TASK{:04}", state.tasks.len() + 1),
            project_id: options.project_id.clone(),
        };
        state.tasks.push(MockTask {
            task: task.clone(),
            payload: payload.to_string(),
            options: options.clone(),
            disabled: false,
        });
        Ok(task)
    }

    async fn list_tasks_for_project(&self, project_id: &str) -> Result<Vec<Task>> {
        let state = self.lock()?;
        Ok(state
            .tasks
            .iter()
            .filter(|t| !t.disabled && t.task.project_id == project_id)
            .map(|t| t.task.clone())
            .collect())
    }

    async fn disable_task(&self, task: &Task) -> Result<()> {
        let mut state = self.lock()?;
        state.disable_log.push(task.id.clone());
        if state.fail_disable {
            return Err(ScribepoolError::Marketplace {
                message: format!("simulated failure disabling {}", task.id),
            });
        }
        match state.tasks.iter_mut().find(|t| t.task.id == task.id) {
            Some(found) => {
                found.disabled = true;
                Ok(())
            }
            None => Err(ScribepoolError::Marketplace {
                message: format!("no such task {}", task.id),
            }),
        }
    }
}
