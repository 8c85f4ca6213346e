//! 安全扫描任务服务
//!
//! JobService：start(params) 创建任务，返回的 URL 或正文中带有可提取的任务 ID；
//! poll(job_id) 返回 { status, total, failed, passRate, tests: [{id, passed}] }。
//! HttpJobService 用 reqwest 对接 HTTP 实现；extract_job_id 按文档约定的模式提取 ID。

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 任务服务调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobServiceError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),
}

/// start 的原始响应：服务指明的任务 URL（Location 或重定向后的地址）与正文
#[derive(Debug, Clone, Default)]
pub struct StartResponse {
    /// 仅在服务明确给出时填写；请求本身的 URL 不算
    pub url: Option<String>,
    pub body: String,
}

/// 单个测试项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub id: String,
    pub passed: bool,
}

/// 轮询得到的任务快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub status: String,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub failed: u64,
    /// 0.0 ~ 1.0；服务未给出时按 total / failed 计算
    #[serde(default)]
    pub pass_rate: Option<f64>,
    #[serde(default)]
    pub tests: Vec<TestRecord>,
}

/// 快照状态分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Running,
    Stalled,
    /// running / stalled 以外的任何状态
    Terminal,
}

impl JobSnapshot {
    pub fn running() -> Self {
        Self::with_status("running")
    }

    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            total: 0,
            failed: 0,
            pass_rate: None,
            tests: Vec::new(),
        }
    }

    pub fn phase(&self) -> JobPhase {
        match self.status.trim().to_ascii_lowercase().as_str() {
            "running" => JobPhase::Running,
            "stalled" => JobPhase::Stalled,
            _ => JobPhase::Terminal,
        }
    }

    pub fn effective_pass_rate(&self) -> f64 {
        self.pass_rate.unwrap_or_else(|| {
            if self.total == 0 {
                0.0
            } else {
                self.total.saturating_sub(self.failed) as f64 / self.total as f64
            }
        })
    }
}

/// 任务服务 trait
#[async_trait]
pub trait JobService: Send + Sync {
    async fn start(&self, params: &Value) -> Result<StartResponse, JobServiceError>;

    async fn poll(&self, job_id: &str) -> Result<JobSnapshot, JobServiceError>;
}

/// job id 长度上限
const MAX_JOB_ID_LEN: usize = 128;

/// job id 字符集：[A-Za-z0-9][A-Za-z0-9_-]*，且不超过 MAX_JOB_ID_LEN
pub fn is_valid_job_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    id.len() <= MAX_JOB_ID_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

static URL_ID_RE: OnceLock<Option<Regex>> = OnceLock::new();
static BODY_PATH_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TOKEN_ID_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 提取任务 ID：URL 的最后一个路径段形如 /runs/<id>（或 /jobs/、/scans/）时取之，
/// 否则看正文中的 run_id=<id>，再看正文中的同类路径；都不匹配返回 None
pub fn extract_job_id(resp: &StartResponse) -> Option<String> {
    let url_re = URL_ID_RE
        .get_or_init(|| {
            Regex::new(r"/(?:runs|jobs|scans)/([A-Za-z0-9][A-Za-z0-9_-]*)/?(?:[?#]|$)").ok()
        })
        .as_ref()?;
    let body_path_re = BODY_PATH_RE
        .get_or_init(|| Regex::new(r"/(?:runs|jobs|scans)/([A-Za-z0-9][A-Za-z0-9_-]*)").ok())
        .as_ref()?;
    let token_re = TOKEN_ID_RE
        .get_or_init(|| Regex::new(r"\brun_id=([A-Za-z0-9][A-Za-z0-9_-]*)").ok())
        .as_ref()?;

    let from_url = resp
        .url
        .as_deref()
        .and_then(|u| url_re.captures(u))
        .map(|c| c[1].to_string());
    from_url
        .or_else(|| token_re.captures(&resp.body).map(|c| c[1].to_string()))
        .or_else(|| body_path_re.captures(&resp.body).map(|c| c[1].to_string()))
        .filter(|id| id.len() <= MAX_JOB_ID_LEN)
}

/// start 响应中可信的任务 URL：Location 优先，其次是重定向后与请求不同的最终 URL
fn announced_url(request_url: &str, final_url: &str, location: Option<String>) -> Option<String> {
    location.or_else(|| (final_url != request_url).then(|| final_url.to_string()))
}

/// HTTP 任务服务：POST {base}/runs 创建，GET {base}/runs/{id} 查询
pub struct HttpJobService {
    client: Client,
    base_url: String,
}

impl HttpJobService {
    pub fn new(base_url: &str, request_timeout_secs: u64) -> Result<Self, JobServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs.max(1)))
            .build()
            .map_err(|e| JobServiceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn map_reqwest(e: reqwest::Error) -> JobServiceError {
    if e.is_timeout() {
        JobServiceError::Timeout
    } else {
        JobServiceError::Transport(e.to_string())
    }
}

#[async_trait]
impl JobService for HttpJobService {
    async fn start(&self, params: &Value) -> Result<StartResponse, JobServiceError> {
        let request_url = reqwest::Url::parse(&format!("{}/runs", self.base_url))
            .map_err(|e| JobServiceError::Transport(e.to_string()))?;
        let resp = self
            .client
            .post(request_url.clone())
            .json(params)
            .send()
            .await
            .map_err(map_reqwest)?;
        let status = resp.status();
        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let url = announced_url(request_url.as_str(), resp.url().as_str(), location);
        let body = resp.text().await.map_err(map_reqwest)?;
        if !status.is_success() {
            return Err(JobServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(StartResponse { url, body })
    }

    async fn poll(&self, job_id: &str) -> Result<JobSnapshot, JobServiceError> {
        if !is_valid_job_id(job_id) {
            return Err(JobServiceError::InvalidJobId(job_id.chars().take(64).collect()));
        }
        let resp = self
            .client
            .get(format!("{}/runs/{}", self.base_url, job_id))
            .send()
            .await
            .map_err(map_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(JobServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<JobSnapshot>()
            .await
            .map_err(|e| JobServiceError::Decode(e.to_string()))
    }
}
