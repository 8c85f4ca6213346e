//! 长任务轮询（AsyncJobPoller）
//!
//! 可选地先 start 创建任务并从响应中提取 job id（提取不到立即返回 IdNotFound，不做任何轮询）；
//! 之后循环 poll：running / stalled 则等待 interval 后重试，其它状态即终态，汇总计数、通过率与失败项。
//! 截止时间到仍未见终态时返回带 job id 的 TimedOut 摘要（不是错误），便于之后在外部继续轮询。
//! 每次 poll 单独限时（不超过剩余时间），单次慢请求最多拖延一个 poll 超时。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::jobs::{extract_job_id, is_valid_job_id, JobPhase, JobService, JobSnapshot};

/// 响应正文摘录的最大字符数
const EXCERPT_CHARS: usize = 200;

/// 轮询参数
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    pub deadline: Duration,
    /// 单次 start / poll 请求的超时
    pub request_timeout: Duration,
    /// 摘要中保留的失败项上限
    pub top_findings: usize,
}

impl PollOptions {
    /// interval 至少 1 秒，0 会让轮询变成忙等
    pub fn from_secs(interval_secs: u64, deadline_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs.max(1)),
            deadline: Duration::from_secs(deadline_secs),
            request_timeout: Duration::from_secs(15),
            top_findings: 5,
        }
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(secs.max(1));
        self
    }

    pub fn with_top_findings(mut self, n: usize) -> Self {
        self.top_findings = n;
        self
    }
}

/// 从何处开始：创建新任务，或继续轮询已有任务
#[derive(Debug, Clone)]
pub enum JobStart {
    Start(Value),
    Resume(String),
}

/// 轮询期间持有的任务句柄
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
}

/// 一次 run_and_await 的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobSummary {
    Completed {
        job_id: String,
        status: String,
        total: u64,
        failed: u64,
        pass_rate: f64,
        top_findings: Vec<String>,
        polls: u32,
    },
    TimedOut {
        job_id: String,
        last_status: Option<String>,
        polls: u32,
    },
    IdNotFound {
        response_excerpt: String,
    },
    StartFailed {
        reason: String,
    },
    Cancelled {
        job_id: Option<String>,
        polls: u32,
    },
}

impl JobSummary {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobSummary::Completed { job_id, .. } | JobSummary::TimedOut { job_id, .. } => {
                Some(job_id)
            }
            JobSummary::Cancelled { job_id, .. } => job_id.as_deref(),
            JobSummary::IdNotFound { .. } | JobSummary::StartFailed { .. } => None,
        }
    }

    pub fn polls(&self) -> u32 {
        match self {
            JobSummary::Completed { polls, .. }
            | JobSummary::TimedOut { polls, .. }
            | JobSummary::Cancelled { polls, .. } => *polls,
            JobSummary::IdNotFound { .. } | JobSummary::StartFailed { .. } => 0,
        }
    }

    /// 是否为需要报告给模型的失败（超时不算失败）
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobSummary::IdNotFound { .. } | JobSummary::StartFailed { .. }
        )
    }

    /// 紧凑的文本摘要（作为工具结果交给模型）
    pub fn render(&self) -> String {
        match self {
            JobSummary::Completed {
                job_id,
                status,
                total,
                failed,
                pass_rate,
                top_findings,
                ..
            } => {
                let mut s = format!(
                    "Scan {} finished with status '{}': {} checks, {} failed, pass rate {:.1}%.",
                    job_id,
                    status,
                    total,
                    failed,
                    pass_rate * 100.0
                );
                if !top_findings.is_empty() {
                    s.push_str("\nTop failing checks:");
                    for f in top_findings {
                        s.push_str(&format!("\n- {}", f));
                    }
                }
                s
            }
            JobSummary::TimedOut {
                job_id,
                last_status,
                polls,
            } => format!(
                "Scan {} still {} after {} polls; deadline reached. Check again later with job id {}.",
                job_id,
                last_status.as_deref().unwrap_or("unreported"),
                polls,
                job_id
            ),
            JobSummary::IdNotFound { response_excerpt } => format!(
                "Scan start response contained no job id (response: {})",
                response_excerpt
            ),
            JobSummary::StartFailed { reason } => format!("Scan could not be started: {}", reason),
            JobSummary::Cancelled { job_id, polls } => match job_id {
                Some(id) => format!("Polling of scan {} cancelled after {} polls.", id, polls),
                None => "Scan start cancelled.".to_string(),
            },
        }
    }
}

fn excerpt(s: &str) -> String {
    if s.chars().count() > EXCERPT_CHARS {
        format!("{}...", s.chars().take(EXCERPT_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}

fn summarize(job_id: &str, snap: JobSnapshot, polls: u32, top_findings: usize) -> JobSummary {
    let pass_rate = snap.effective_pass_rate();
    let top_findings = snap
        .tests
        .iter()
        .filter(|t| !t.passed)
        .take(top_findings)
        .map(|t| t.id.clone())
        .collect();
    JobSummary::Completed {
        job_id: job_id.to_string(),
        status: snap.status,
        total: snap.total,
        failed: snap.failed,
        pass_rate,
        top_findings,
        polls,
    }
}

/// 长任务轮询器
#[derive(Debug, Clone)]
pub struct AsyncJobPoller {
    options: PollOptions,
}

impl AsyncJobPoller {
    pub fn new(options: PollOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PollOptions {
        &self.options
    }

    pub async fn run_and_await(
        &self,
        service: &dyn JobService,
        start: JobStart,
        cancel: &CancellationToken,
    ) -> JobSummary {
        let opts = self.options;
        let deadline_at = Instant::now() + opts.deadline;

        let job_id = match start {
            JobStart::Resume(id) if is_valid_job_id(&id) => id,
            JobStart::Resume(id) => {
                return JobSummary::StartFailed {
                    reason: format!("invalid job id '{}'", excerpt(&id)),
                };
            }
            JobStart::Start(params) => {
                let started = tokio::select! {
                    _ = cancel.cancelled() => {
                        return JobSummary::Cancelled { job_id: None, polls: 0 };
                    }
                    r = timeout(opts.request_timeout, service.start(&params)) => r,
                };
                let resp = match started {
                    Ok(Ok(resp)) => resp,
                    Ok(Err(e)) => return JobSummary::StartFailed { reason: e.to_string() },
                    Err(_) => {
                        return JobSummary::StartFailed {
                            reason: format!(
                                "start request timed out after {}s",
                                opts.request_timeout.as_secs()
                            ),
                        }
                    }
                };
                match extract_job_id(&resp) {
                    Some(id) => id,
                    None => {
                        tracing::warn!(url = ?resp.url, "no job id in start response");
                        return JobSummary::IdNotFound {
                            response_excerpt: excerpt(&resp.body),
                        };
                    }
                }
            }
        };
        let handle = JobHandle {
            job_id,
            started_at: Utc::now(),
        };
        tracing::info!(job_id = %handle.job_id, started_at = %handle.started_at, "job polling started");

        let mut polls: u32 = 0;
        let mut last_status: Option<String> = None;
        loop {
            let now = Instant::now();
            if now >= deadline_at {
                tracing::warn!(job_id = %handle.job_id, polls, "job polling deadline reached");
                return JobSummary::TimedOut {
                    job_id: handle.job_id,
                    last_status,
                    polls,
                };
            }
            let budget = opts.request_timeout.min(deadline_at - now);
            polls += 1;
            let polled = tokio::select! {
                _ = cancel.cancelled() => {
                    return JobSummary::Cancelled { job_id: Some(handle.job_id), polls };
                }
                r = timeout(budget, service.poll(&handle.job_id)) => r,
            };
            match polled {
                Ok(Ok(snap)) => match snap.phase() {
                    JobPhase::Terminal => {
                        tracing::info!(job_id = %handle.job_id, status = %snap.status, polls, "job reached terminal status");
                        return summarize(&handle.job_id, snap, polls, opts.top_findings);
                    }
                    JobPhase::Running | JobPhase::Stalled => {
                        tracing::debug!(job_id = %handle.job_id, status = %snap.status, polls, "job not finished");
                        last_status = Some(snap.status);
                    }
                },
                Ok(Err(e)) => {
                    tracing::warn!(job_id = %handle.job_id, error = %e, polls, "job poll failed");
                }
                Err(_) => {
                    tracing::warn!(job_id = %handle.job_id, timeout_ms = budget.as_millis() as u64, "job poll timed out");
                }
            }

            let now = Instant::now();
            if now >= deadline_at {
                continue;
            }
            let nap = opts.interval.min(deadline_at - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return JobSummary::Cancelled { job_id: Some(handle.job_id), polls };
                }
                _ = sleep(nap) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobServiceError, StartResponse, TestRecord};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// 按脚本返回快照的假服务；脚本耗尽后一直返回最后一个
    struct FakeService {
        start_url: Option<String>,
        start_body: String,
        script: Mutex<VecDeque<Result<JobSnapshot, JobServiceError>>>,
        fallback: JobSnapshot,
        polls: AtomicU32,
        poll_delay: Duration,
    }

    impl FakeService {
        fn new(script: Vec<Result<JobSnapshot, JobServiceError>>) -> Self {
            Self {
                start_url: Some("https://scan.local/runs/job-7".into()),
                start_body: String::new(),
                script: Mutex::new(script.into()),
                fallback: JobSnapshot::running(),
                polls: AtomicU32::new(0),
                poll_delay: Duration::ZERO,
            }
        }

        fn polls(&self) -> u32 {
            self.polls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobService for FakeService {
        async fn start(&self, _params: &Value) -> Result<StartResponse, JobServiceError> {
            Ok(StartResponse {
                url: self.start_url.clone(),
                body: self.start_body.clone(),
            })
        }

        async fn poll(&self, _job_id: &str) -> Result<JobSnapshot, JobServiceError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if !self.poll_delay.is_zero() {
                sleep(self.poll_delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn done() -> JobSnapshot {
        JobSnapshot {
            status: "done".into(),
            total: 10,
            failed: 3,
            pass_rate: Some(0.7),
            tests: vec![
                TestRecord { id: "tls-version".into(), passed: false },
                TestRecord { id: "headers".into(), passed: true },
                TestRecord { id: "open-ports".into(), passed: false },
                TestRecord { id: "cookie-flags".into(), passed: false },
            ],
        }
    }

    fn poller(interval: u64, deadline: u64) -> AsyncJobPoller {
        AsyncJobPoller::new(PollOptions::from_secs(interval, deadline).with_top_findings(2))
    }

    #[tokio::test(start_paused = true)]
    async fn running_twice_then_done_polls_three_times() {
        let service = FakeService::new(vec![
            Ok(JobSnapshot::running()),
            Ok(JobSnapshot::with_status("stalled")),
            Ok(done()),
        ]);
        let summary = poller(5, 600)
            .run_and_await(&service, JobStart::Start(Value::Null), &CancellationToken::new())
            .await;
        assert_eq!(service.polls(), 3);
        match summary {
            JobSummary::Completed { job_id, failed, top_findings, polls, .. } => {
                assert_eq!(job_id, "job-7");
                assert_eq!(failed, 3);
                assert_eq!(polls, 3);
                assert_eq!(top_findings, vec!["tls-version", "open-ports"]);
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_finishing_job_times_out_near_deadline() {
        let service = FakeService::new(Vec::new());
        let started = Instant::now();
        let summary = poller(10, 60)
            .run_and_await(&service, JobStart::Resume("job-9".into()), &CancellationToken::new())
            .await;
        let elapsed = started.elapsed();
        assert!(elapsed <= Duration::from_secs(70), "elapsed {:?}", elapsed);
        assert!(elapsed >= Duration::from_secs(50), "elapsed {:?}", elapsed);
        match summary {
            JobSummary::TimedOut { job_id, last_status, .. } => {
                assert_eq!(job_id, "job-9");
                assert_eq!(last_status.as_deref(), Some("running"));
            }
            other => panic!("expected TimedOut, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_job_id_returns_without_polling() {
        let mut service = FakeService::new(vec![Ok(done())]);
        service.start_url = Some("https://scan.local/submit".into());
        service.start_body = "accepted".into();
        let summary = poller(5, 60)
            .run_and_await(&service, JobStart::Start(Value::Null), &CancellationToken::new())
            .await;
        assert_eq!(service.polls(), 0);
        assert!(matches!(summary, JobSummary::IdNotFound { ref response_excerpt } if response_excerpt == "accepted"));
        assert!(summary.is_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_poll_is_bounded_by_request_timeout() {
        let mut service = FakeService::new(Vec::new());
        service.poll_delay = Duration::from_secs(3600);
        let opts = PollOptions::from_secs(5, 30).with_request_timeout(10);
        let started = Instant::now();
        let summary = AsyncJobPoller::new(opts)
            .run_and_await(&service, JobStart::Resume("slow".into()), &CancellationToken::new())
            .await;
        assert!(started.elapsed() <= Duration::from_secs(40));
        assert!(matches!(summary, JobSummary::TimedOut { last_status: None, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_errors_are_retried() {
        let service = FakeService::new(vec![
            Err(JobServiceError::Transport("reset".into())),
            Ok(done()),
        ]);
        let summary = poller(1, 60)
            .run_and_await(&service, JobStart::Resume("job-1".into()), &CancellationToken::new())
            .await;
        assert_eq!(summary.polls(), 2);
        assert!(summary.render().contains("pass rate 70.0%"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling_and_keeps_job_id() {
        let service = FakeService::new(Vec::new());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });
        let summary = poller(5, 600)
            .run_and_await(&service, JobStart::Resume("job-3".into()), &cancel)
            .await;
        assert_eq!(summary.job_id(), Some("job-3"));
        assert!(matches!(summary, JobSummary::Cancelled { .. }));
    }

    #[test]
    fn zero_interval_is_clamped() {
        assert_eq!(PollOptions::from_secs(0, 60).interval, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_does_not_spin() {
        let service = FakeService::new(Vec::new());
        let summary = poller(0, 10)
            .run_and_await(&service, JobStart::Resume("spin".into()), &CancellationToken::new())
            .await;
        assert!(matches!(summary, JobSummary::TimedOut { .. }));
        assert!(service.polls() <= 11);
    }

    #[tokio::test]
    async fn malformed_resume_id_is_rejected_before_polling() {
        let service = FakeService::new(Vec::new());
        let summary = poller(1, 60)
            .run_and_await(
                &service,
                JobStart::Resume("../../admin?x=1".into()),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(summary, JobSummary::StartFailed { ref reason } if reason.contains("invalid job id")));
        assert_eq!(service.polls(), 0);
    }

    #[test]
    fn timeout_summary_tells_how_to_resume() {
        let s = JobSummary::TimedOut {
            job_id: "abc".into(),
            last_status: Some("running".into()),
            polls: 4,
        };
        assert!(s.render().contains("job id abc"));
        assert!(!s.is_failure());
    }
}
