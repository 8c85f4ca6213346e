//! 安全扫描工具：start_security_scan（创建并等待）与 check_security_scan（按 job id 继续轮询）
//!
//! 两者都走 AsyncJobPoller；超时摘要带 job id，模型可以之后用 check_security_scan 续查。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::jobs::{is_valid_job_id, AsyncJobPoller, JobService, JobStart};
use crate::tools::schema::{parameters_schema, parse_args};
use crate::tools::{Tool, ToolRegistry};

#[derive(Debug, Deserialize, JsonSchema)]
struct StartScanArgs {
    /// 扫描目标（URL 或主机名）
    target: String,
    /// 扫描配置名，默认 "standard"
    #[serde(default)]
    profile: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CheckScanArgs {
    /// 之前返回的 job id
    job_id: String,
}

/// start_security_scan
pub struct StartSecurityScanTool {
    service: Arc<dyn JobService>,
    poller: AsyncJobPoller,
}

impl StartSecurityScanTool {
    pub fn new(service: Arc<dyn JobService>, poller: AsyncJobPoller) -> Self {
        Self { service, poller }
    }
}

#[async_trait]
impl Tool for StartSecurityScanTool {
    fn name(&self) -> &str {
        "start_security_scan"
    }

    fn description(&self) -> &str {
        "Start a security scan against a target and wait for the result. Returns pass rate and top failing checks, or a job id to check later if it takes too long."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<StartScanArgs>()
    }

    async fn execute(&self, args: Value, cancel: &CancellationToken) -> Result<String, String> {
        let args: StartScanArgs = parse_args(self.name(), args)?;
        let target = args.target.trim();
        if target.is_empty() {
            return Err("target must not be empty".to_string());
        }
        let params = json!({
            "target": target,
            "profile": args.profile.as_deref().unwrap_or("standard"),
        });
        tracing::info!(target = %target, "start_security_scan tool execute");
        let summary = self
            .poller
            .run_and_await(self.service.as_ref(), JobStart::Start(params), cancel)
            .await;
        if summary.is_failure() {
            Err(summary.render())
        } else {
            Ok(summary.render())
        }
    }
}

/// check_security_scan
pub struct CheckSecurityScanTool {
    service: Arc<dyn JobService>,
    poller: AsyncJobPoller,
}

impl CheckSecurityScanTool {
    pub fn new(service: Arc<dyn JobService>, poller: AsyncJobPoller) -> Self {
        Self { service, poller }
    }
}

#[async_trait]
impl Tool for CheckSecurityScanTool {
    fn name(&self) -> &str {
        "check_security_scan"
    }

    fn description(&self) -> &str {
        "Check a previously started security scan by job id, waiting until it finishes or the deadline passes."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<CheckScanArgs>()
    }

    async fn execute(&self, args: Value, cancel: &CancellationToken) -> Result<String, String> {
        let args: CheckScanArgs = parse_args(self.name(), args)?;
        let job_id = args.job_id.trim().to_string();
        if job_id.is_empty() {
            return Err("job_id must not be empty".to_string());
        }
        if !is_valid_job_id(&job_id) {
            return Err("job_id may only contain letters, digits, '_' and '-'".to_string());
        }
        let summary = self
            .poller
            .run_and_await(self.service.as_ref(), JobStart::Resume(job_id), cancel)
            .await;
        Ok(summary.render())
    }
}

/// 构建 jobs 分类；分派超时为轮询截止时间再加一个请求超时
pub fn jobs_category(service: Arc<dyn JobService>, poller: AsyncJobPoller) -> ToolRegistry {
    let opts = *poller.options();
    let limit = opts.deadline + opts.request_timeout + Duration::from_secs(5);
    let mut registry = ToolRegistry::new("jobs").with_timeout(limit);
    registry.register(StartSecurityScanTool::new(service.clone(), poller.clone()));
    registry.register(CheckSecurityScanTool::new(service, poller));
    registry
}
