//! Public operations of the analyzer: start, watch, cancel and read results.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use sqlx::SqlitePool;

use crate::config::CheckerSettings;
use crate::domain::models::{
    Ack, CancelResponse, CancelStatus, ResultsReport, StartResponse, StartStatus, StatusSnapshot,
};
use crate::error::Result;
use crate::repository::sqlite::{ResultsRepository, StatusRepository};
use crate::repository::DocumentSource;
use crate::service::event_log::{EventLog, TracingEventLog};
use crate::service::http::create_client;
use crate::service::processor::{AnalysisProcessor, RunContext};
use crate::service::task_runner::{job, TaskHandle, TaskPoll, TaskRunner};
use crate::service::validator::{HttpProber, LinkValidator, Prober};

pub const CANCELLED_MESSAGE: &str = "Analysis cancelled by user";
pub const LOST_TASK_MESSAGE: &str = "Analysis task is no longer running";

pub struct BrokenLinkService {
    status: StatusRepository,
    results: ResultsRepository,
    processor: Arc<AnalysisProcessor>,
    runner: Arc<dyn TaskRunner>,
    last_task: DashMap<i64, TaskHandle>,
    log: Arc<dyn EventLog>,
}

impl BrokenLinkService {
    /// Service probing links over HTTP and logging through `tracing`.
    pub fn new(
        pool: SqlitePool,
        documents: Arc<dyn DocumentSource>,
        runner: Arc<dyn TaskRunner>,
        settings: CheckerSettings,
    ) -> anyhow::Result<Self> {
        let prober = Arc::new(HttpProber::new(create_client(&settings)?));
        Ok(Self::with_prober(
            pool,
            documents,
            runner,
            prober,
            settings,
            Arc::new(TracingEventLog),
        ))
    }

    pub fn with_prober(
        pool: SqlitePool,
        documents: Arc<dyn DocumentSource>,
        runner: Arc<dyn TaskRunner>,
        prober: Arc<dyn Prober>,
        settings: CheckerSettings,
        log: Arc<dyn EventLog>,
    ) -> Self {
        let validator = LinkValidator::new(prober, settings, log.clone());
        let processor = AnalysisProcessor::new(pool.clone(), documents, validator, log.clone());

        Self {
            status: StatusRepository::new(pool.clone()),
            results: ResultsRepository::new(pool),
            processor: Arc::new(processor),
            runner,
            last_task: DashMap::new(),
            log,
        }
    }

    /// Claim the project and run an analysis in the background.
    pub async fn start_analysis(&self, project_id: i64) -> Result<StartResponse> {
        let handle = TaskHandle::generate();

        if !self
            .status
            .try_claim(project_id, handle.as_str(), Utc::now())
            .await?
        {
            let current = self.status.get_or_create(project_id).await?;
            self.log.info(&format!(
                "Analysis for project {} already running (task {:?})",
                project_id, current.task_id
            ));
            return Ok(StartResponse {
                status: StartStatus::AlreadyRunning,
                task_id: current.task_id,
            });
        }

        let processor = self.processor.clone();
        self.runner.submit(
            handle.clone(),
            project_id,
            job(move |ctx| async move {
                let run = RunContext {
                    project_id,
                    task_id: ctx.handle.to_string(),
                    token: ctx.token,
                    progress: ctx.progress,
                };
                processor.run(&run).await.map(|_| ())
            }),
        );
        self.last_task.insert(project_id, handle.clone());

        Ok(StartResponse {
            status: StartStatus::Started,
            task_id: Some(handle.to_string()),
        })
    }

    /// Current status. A row still marked analyzing whose task the runner no
    /// longer knows about is released with an error message.
    pub async fn get_status(&self, project_id: i64) -> Result<StatusSnapshot> {
        let mut status = self.status.get_or_create(project_id).await?;

        if status.is_analyzing {
            if let Some(task_id) = status.task_id.clone() {
                let handle = TaskHandle::from(task_id.clone());
                if self.runner.poll(&handle).is_none() {
                    self.log.warn(&format!(
                        "Task {} for project {} is gone, releasing analysis",
                        task_id, project_id
                    ));
                    self.status
                        .fail(project_id, &task_id, LOST_TASK_MESSAGE)
                        .await?;
                    status = self.status.get_or_create(project_id).await?;
                }
            }
        }

        Ok(status.snapshot(Utc::now()))
    }

    pub async fn cancel_analysis(&self, project_id: i64) -> Result<CancelResponse> {
        let current = self.status.get_or_create(project_id).await?;
        if !self.status.cancel(project_id, CANCELLED_MESSAGE).await? {
            return Ok(CancelResponse {
                status: CancelStatus::NotAnalyzing,
            });
        }

        if let Some(task_id) = current.task_id {
            if !self.runner.cancel(&TaskHandle::from(task_id.clone())) {
                self.log
                    .debug(&format!("Task {} was not running in this process", task_id));
            }
        }
        self.log
            .info(&format!("Analysis for project {} cancelled", project_id));

        Ok(CancelResponse {
            status: CancelStatus::Cancelled,
        })
    }

    pub async fn get_results(&self, project_id: i64) -> Result<ResultsReport> {
        let Some(result) = self.results.find_by_project(project_id).await? else {
            return Ok(ResultsReport::from_links(Vec::new(), None));
        };

        let links = self.results.list_broken_links(result.id).await?;
        Ok(ResultsReport::from_links(links, Some(result.last_updated)))
    }

    pub async fn reset_counters(&self, project_id: i64) -> Result<Ack> {
        self.status.reset_counters(project_id).await?;
        Ok(Ack {
            message: "Counters reset".to_string(),
        })
    }

    /// Runner view of the most recent task started for the project.
    pub fn task_state(&self, project_id: i64) -> Option<TaskPoll> {
        let handle = self.last_task.get(&project_id)?;
        self.runner.poll(handle.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::models::{Document, FindingStatus};
    use crate::service::event_log::MemoryEventLog;
    use crate::service::task_runner::{TaskState, TokioTaskRunner};
    use crate::test_utils::fixtures::{sample_page, setup_test_db};
    use crate::test_utils::mocks::{BlockingProber, MemoryDocuments, ScriptedProber};

    struct Setup {
        pool: SqlitePool,
        documents: Arc<MemoryDocuments>,
        prober: Arc<ScriptedProber>,
        service: BrokenLinkService,
    }

    async fn setup() -> Setup {
        let pool = setup_test_db().await;
        let documents = Arc::new(MemoryDocuments::with_project(
            1,
            vec![Document::new(
                "https://site.test/",
                sample_page("https://site.test/gone", "https://site.test/home"),
            )],
        ));
        let prober = Arc::new(ScriptedProber::new());
        prober.respond("https://site.test/gone", 404);

        let settings = CheckerSettings {
            backoff_factor: 0.0,
            ..Default::default()
        };
        let service = BrokenLinkService::with_prober(
            pool.clone(),
            documents.clone(),
            Arc::new(TokioTaskRunner::new()),
            prober.clone(),
            settings,
            Arc::new(MemoryEventLog::new()),
        );

        Setup {
            pool,
            documents,
            prober,
            service,
        }
    }

    async fn wait_idle(service: &BrokenLinkService, project_id: i64) -> StatusSnapshot {
        for _ in 0..400 {
            let status = service.get_status(project_id).await.unwrap();
            let task_done = service
                .task_state(project_id)
                .map_or(true, |poll| poll.state.is_finished());
            if !status.is_analyzing && task_done {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("analysis for project {} did not finish", project_id);
    }

    #[tokio::test]
    async fn test_full_run_reports_results() {
        let s = setup().await;

        let started = s.service.start_analysis(1).await.unwrap();
        assert_eq!(started.status, StartStatus::Started);
        assert!(started.task_id.is_some());

        let status = wait_idle(&s.service, 1).await;
        assert_eq!(status.broken_links, 1);
        assert_eq!(status.total_links, 3);
        assert_eq!(status.progress, 3);
        assert!(status.error_message.is_none());
        assert!(status.elapsed_secs.is_none());

        let report = s.service.get_results(1).await.unwrap();
        assert_eq!(report.http_errors, 1);
        assert_eq!(report.seo_warnings, 0);
        assert_eq!(report.no_response, 0);
        assert_eq!(report.broken_links[0].status, FindingStatus::Http(404));
        assert!(report.last_updated.is_some());

        let poll = s.service.task_state(1).unwrap();
        assert_eq!(poll.state, TaskState::Succeeded);
        assert_eq!((poll.current, poll.total), (3, 3));
    }

    #[tokio::test]
    async fn test_start_while_analyzing_leaves_counters() {
        let s = setup().await;
        let status = StatusRepository::new(s.pool.clone());
        assert!(status.try_claim(1, "running-task", Utc::now()).await.unwrap());
        status.add_discovered(1, "running-task", 10).await.unwrap();
        status.add_progress(1, "running-task", 4).await.unwrap();

        let response = s.service.start_analysis(1).await.unwrap();
        assert_eq!(response.status, StartStatus::AlreadyRunning);
        assert_eq!(response.task_id.as_deref(), Some("running-task"));

        let row = status.get(1).await.unwrap().unwrap();
        assert!(row.is_analyzing);
        assert_eq!((row.progress, row.total_links), (4, 10));
        assert_eq!(s.prober.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_not_analyzing() {
        let s = setup().await;
        let before = s.service.get_status(1).await.unwrap();

        let response = s.service.cancel_analysis(1).await.unwrap();
        assert_eq!(response.status, CancelStatus::NotAnalyzing);
        assert_eq!(s.service.get_status(1).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_cancel_running_analysis() {
        let s = setup().await;
        let status = StatusRepository::new(s.pool.clone());
        assert!(status.try_claim(1, "t-cancel", Utc::now()).await.unwrap());

        let response = s.service.cancel_analysis(1).await.unwrap();
        assert_eq!(response.status, CancelStatus::Cancelled);

        let row = status.get(1).await.unwrap().unwrap();
        assert!(!row.is_analyzing);
        assert_eq!(row.error_message.as_deref(), Some(CANCELLED_MESSAGE));

        // late writes from the cancelled run are dropped
        assert!(!status.add_progress(1, "t-cancel", 5).await.unwrap());
        assert_eq!(status.get(1).await.unwrap().unwrap().progress, 0);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_run() {
        let documents = Arc::new(MemoryDocuments::with_project(
            1,
            vec![Document::new(
                "https://site.test/",
                sample_page("https://site.test/gone", "https://site.test/home"),
            )],
        ));
        let prober = Arc::new(BlockingProber::default());
        let service = BrokenLinkService::with_prober(
            setup_test_db().await,
            documents,
            Arc::new(TokioTaskRunner::new()),
            prober.clone(),
            CheckerSettings::default(),
            Arc::new(MemoryEventLog::new()),
        );

        service.start_analysis(1).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), prober.wait_started())
            .await
            .expect("run never reached the network");

        let running = service.get_status(1).await.unwrap();
        assert!(running.is_analyzing);
        assert_eq!((running.progress, running.total_links), (0, 3));

        let response = service.cancel_analysis(1).await.unwrap();
        assert_eq!(response.status, CancelStatus::Cancelled);
        assert_eq!(service.task_state(1).unwrap().state, TaskState::Cancelled);

        let cancelled = service.get_status(1).await.unwrap();
        assert!(!cancelled.is_analyzing);
        assert_eq!(cancelled.progress, 0);
        assert_eq!(cancelled.error_message.as_deref(), Some(CANCELLED_MESSAGE));
        let calls = prober.total_calls();

        // the dropped run must not write anything afterwards
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(service.get_status(1).await.unwrap(), cancelled);
        assert_eq!(service.task_state(1).unwrap().state, TaskState::Cancelled);
        assert!(service.get_results(1).await.unwrap().broken_links.is_empty());
        assert_eq!(prober.total_calls(), calls);
    }

    #[tokio::test]
    async fn test_unknown_project_fails_run() {
        let s = setup().await;

        s.service.start_analysis(42).await.unwrap();
        let status = wait_idle(&s.service, 42).await;

        assert_eq!(status.error_message.as_deref(), Some("Project not found: 42"));
        assert_eq!(s.service.task_state(42).unwrap().state, TaskState::Failed);
    }

    #[tokio::test]
    async fn test_lost_task_is_released_on_status_read() {
        let s = setup().await;
        let status = StatusRepository::new(s.pool.clone());
        assert!(status.try_claim(1, "from-previous-process", Utc::now()).await.unwrap());

        let snapshot = s.service.get_status(1).await.unwrap();
        assert!(!snapshot.is_analyzing);
        assert_eq!(snapshot.error_message.as_deref(), Some(LOST_TASK_MESSAGE));
    }

    #[tokio::test]
    async fn test_fixed_link_drops_from_results() {
        let s = setup().await;
        s.service.start_analysis(1).await.unwrap();
        wait_idle(&s.service, 1).await;

        s.documents.set_documents(
            1,
            vec![Document::new(
                "https://site.test/",
                sample_page("https://site.test/home", "https://site.test/home"),
            )],
        );
        s.service.start_analysis(1).await.unwrap();
        let status = wait_idle(&s.service, 1).await;

        assert_eq!(status.broken_links, 0);
        assert!(s.service.get_results(1).await.unwrap().broken_links.is_empty());
    }

    #[tokio::test]
    async fn test_reset_counters() {
        let s = setup().await;
        s.service.start_analysis(1).await.unwrap();
        wait_idle(&s.service, 1).await;

        let ack = s.service.reset_counters(1).await.unwrap();
        assert_eq!(ack.message, "Counters reset");

        let status = s.service.get_status(1).await.unwrap();
        assert_eq!(
            (status.progress, status.total_links, status.broken_links, status.no_response_links),
            (0, 0, 0, 0)
        );
        assert!(status.last_analysis.is_some());
        // stored findings are kept
        assert_eq!(s.service.get_results(1).await.unwrap().broken_links.len(), 1);
    }

    #[tokio::test]
    async fn test_results_before_any_run_are_empty() {
        let s = setup().await;
        let report = s.service.get_results(1).await.unwrap();
        assert!(report.broken_links.is_empty());
        assert!(report.last_updated.is_none());
    }
}
