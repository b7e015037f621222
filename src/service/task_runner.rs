//! In-process background task runner.
//!
//! Each submitted job runs on its own tokio task and is raced against a
//! per-task `CancellationToken`, so cancelling drops the job future (and any
//! request it is awaiting) at its next await point.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::service::processor::ProgressSink;

pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Work handed to the runner; called once with the task's context.
pub type Job = Box<dyn FnOnce(TaskContext) -> TaskFuture + Send>;

/// Box an async closure into a [`Job`].
pub fn job<F, Fut>(f: F) -> Job
where
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |ctx| -> TaskFuture { Box::pin(f(ctx)) })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TaskHandle(String);

impl TaskHandle {
    /// Allocate a fresh task id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskHandle {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskPoll {
    pub state: TaskState,
    /// Error text of a failed task
    pub detail: Option<String>,
    pub current: i64,
    pub total: i64,
}

/// What a job receives when it starts.
pub struct TaskContext {
    pub handle: TaskHandle,
    pub token: CancellationToken,
    pub progress: Arc<dyn ProgressSink>,
}

pub trait TaskRunner: Send + Sync {
    /// Start `job` under `handle`. The caller allocates the handle so it can be
    /// recorded before the job runs.
    fn submit(&self, handle: TaskHandle, project_id: i64, job: Job);

    fn report_progress(&self, handle: &TaskHandle, current: i64, total: i64);

    /// Request cancellation. Returns false for unknown or finished tasks.
    fn cancel(&self, handle: &TaskHandle) -> bool;

    fn poll(&self, handle: &TaskHandle) -> Option<TaskPoll>;
}

struct TaskEntry {
    project_id: i64,
    token: CancellationToken,
    poll: TaskPoll,
}

#[derive(Clone, Default)]
pub struct TokioTaskRunner {
    tasks: Arc<DashMap<String, TaskEntry>>,
}

impl TokioTaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget finished tasks of `project_id`. Only the newest task of a
    /// project is looked up by the service, older entries are never polled.
    fn evict_finished(&self, project_id: i64) {
        self.tasks
            .retain(|_, entry| entry.project_id != project_id || !entry.poll.state.is_finished());
    }

    fn set_state(tasks: &DashMap<String, TaskEntry>, id: &str, state: TaskState, detail: Option<String>) {
        if let Some(mut entry) = tasks.get_mut(id) {
            // a cancelled task stays cancelled even if its future finished first
            if entry.poll.state == TaskState::Cancelled {
                return;
            }
            entry.poll.state = state;
            entry.poll.detail = detail;
        }
    }
}

impl TaskRunner for TokioTaskRunner {
    fn submit(&self, handle: TaskHandle, project_id: i64, job: Job) {
        self.evict_finished(project_id);

        let token = CancellationToken::new();
        self.tasks.insert(
            handle.0.clone(),
            TaskEntry {
                project_id,
                token: token.clone(),
                poll: TaskPoll {
                    state: TaskState::Pending,
                    detail: None,
                    current: 0,
                    total: 0,
                },
            },
        );

        let tasks = self.tasks.clone();
        let progress: Arc<dyn ProgressSink> = Arc::new(RunnerProgress {
            runner: self.clone(),
            handle: handle.clone(),
        });
        let context = TaskContext {
            handle: handle.clone(),
            token: token.clone(),
            progress,
        };

        tokio::spawn(async move {
            let id = handle.0;
            Self::set_state(&tasks, &id, TaskState::Running, None);
            tracing::debug!("Task {} started for project {}", id, project_id);

            let future = job(context);
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Task {} cancelled", id);
                }
                result = future => match result {
                    Ok(()) => {
                        Self::set_state(&tasks, &id, TaskState::Succeeded, None);
                        tracing::debug!("Task {} succeeded", id);
                    }
                    Err(e) => {
                        tracing::error!("Task {} failed: {:#}", id, e);
                        Self::set_state(&tasks, &id, TaskState::Failed, Some(format!("{:#}", e)));
                    }
                },
            }
        });
    }

    fn report_progress(&self, handle: &TaskHandle, current: i64, total: i64) {
        if let Some(mut entry) = self.tasks.get_mut(handle.as_str()) {
            entry.poll.current = current;
            entry.poll.total = total;
        }
    }

    fn cancel(&self, handle: &TaskHandle) -> bool {
        match self.tasks.get_mut(handle.as_str()) {
            Some(mut entry) if !entry.poll.state.is_finished() => {
                entry.poll.state = TaskState::Cancelled;
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }

    fn poll(&self, handle: &TaskHandle) -> Option<TaskPoll> {
        self.tasks
            .get(handle.as_str())
            .map(|entry| entry.poll.clone())
    }
}

/// Progress sink handed to a job; forwards to the runner's task table.
struct RunnerProgress {
    runner: TokioTaskRunner,
    handle: TaskHandle,
}

impl ProgressSink for RunnerProgress {
    fn report(&self, current: i64, total: i64) {
        self.runner.report_progress(&self.handle, current, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_finished(runner: &TokioTaskRunner, handle: &TaskHandle) -> TaskPoll {
        for _ in 0..200 {
            if let Some(poll) = runner.poll(handle) {
                if poll.state.is_finished() {
                    return poll;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {} did not finish", handle);
    }

    #[tokio::test]
    async fn test_successful_job_reports_progress() {
        let runner = TokioTaskRunner::new();
        let handle = TaskHandle::generate();

        runner.submit(
            handle.clone(),
            1,
            job(|ctx: TaskContext| async move {
                ctx.progress.report(3, 4);
                Ok(())
            }),
        );

        let poll = wait_finished(&runner, &handle).await;
        assert_eq!(poll.state, TaskState::Succeeded);
        assert_eq!((poll.current, poll.total), (3, 4));
    }

    #[tokio::test]
    async fn test_failed_job_keeps_error_detail() {
        let runner = TokioTaskRunner::new();
        let handle = TaskHandle::generate();

        runner.submit(
            handle.clone(),
            1,
            job(|_ctx: TaskContext| async { Err(anyhow::anyhow!("disk full")) }),
        );

        let poll = wait_finished(&runner, &handle).await;
        assert_eq!(poll.state, TaskState::Failed);
        assert_eq!(poll.detail.as_deref(), Some("disk full"));
    }

    #[tokio::test]
    async fn test_cancel_drops_pending_future() {
        let runner = TokioTaskRunner::new();
        let handle = TaskHandle::generate();

        runner.submit(
            handle.clone(),
            7,
            job(|_ctx: TaskContext| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
        );
        assert!(!runner.poll(&handle).unwrap().state.is_finished());

        assert!(runner.cancel(&handle));
        let poll = wait_finished(&runner, &handle).await;
        assert_eq!(poll.state, TaskState::Cancelled);

        // already finished
        assert!(!runner.cancel(&handle));
    }

    #[tokio::test]
    async fn test_report_progress_updates_poll() {
        let runner = TokioTaskRunner::new();
        let handle = TaskHandle::generate();
        runner.submit(
            handle.clone(),
            1,
            job(|_ctx: TaskContext| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
        );

        runner.report_progress(&handle, 2, 9);
        let poll = runner.poll(&handle).unwrap();
        assert_eq!((poll.current, poll.total), (2, 9));

        runner.cancel(&handle);
    }

    #[tokio::test]
    async fn test_new_submit_evicts_finished_tasks_of_project() {
        let runner = TokioTaskRunner::new();
        let first = TaskHandle::generate();
        let other_project = TaskHandle::generate();

        runner.submit(first.clone(), 1, job(|_ctx: TaskContext| async { Ok(()) }));
        runner.submit(other_project.clone(), 2, job(|_ctx: TaskContext| async { Ok(()) }));
        wait_finished(&runner, &first).await;
        wait_finished(&runner, &other_project).await;

        let second = TaskHandle::generate();
        runner.submit(second.clone(), 1, job(|_ctx: TaskContext| async { Ok(()) }));

        assert!(runner.poll(&first).is_none());
        assert!(runner.poll(&other_project).is_some());
        assert_eq!(wait_finished(&runner, &second).await.state, TaskState::Succeeded);
        assert_eq!(runner.tasks.len(), 2);
    }

    #[tokio::test]
    async fn test_new_submit_keeps_unfinished_tasks() {
        let runner = TokioTaskRunner::new();
        let running = TaskHandle::generate();
        runner.submit(
            running.clone(),
            1,
            job(|_ctx: TaskContext| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
        );

        runner.submit(TaskHandle::generate(), 1, job(|_ctx: TaskContext| async { Ok(()) }));
        assert!(runner.poll(&running).is_some());

        runner.cancel(&running);
    }

    #[test]
    fn test_unknown_handle() {
        let runner = TokioTaskRunner::new();
        let handle = TaskHandle::from("missing".to_string());
        assert!(runner.poll(&handle).is_none());
        assert!(!runner.cancel(&handle));
    }
}
