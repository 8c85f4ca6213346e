//! 长任务：任务服务抽象、HTTP 实现、job id 提取与轮询器

pub mod poller;
pub mod service;

pub use poller::{AsyncJobPoller, JobHandle, JobStart, JobSummary, PollOptions};
pub use service::{
    extract_job_id, is_valid_job_id, HttpJobService, JobPhase, JobService, JobServiceError, JobSnapshot,
    StartResponse, TestRecord,
};
