pub mod analysis_service;
pub mod event_log;
pub mod http;
pub mod processor;
pub mod task_runner;
pub mod validator;

pub use analysis_service::BrokenLinkService;
pub use event_log::{EventLevel, EventLog, MemoryEventLog, TracingEventLog};
pub use processor::{AnalysisProcessor, ProgressSink, RunContext, RunOutcome};
pub use task_runner::{TaskHandle, TaskPoll, TaskRunner, TaskState, TokioTaskRunner};
pub use validator::{HttpProber, LinkOutcome, LinkValidator, ProbeMethod, ProbeResponse, Prober};
