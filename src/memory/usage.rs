//! Token 用量计数
//!
//! 单调递增的输入 / 输出 / 总 token 与请求次数；由会话持有，只在用户显式操作时清零。

use serde::{Deserialize, Serialize};

/// 单次模型往返由 provider 报告的用量
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// provider 未报告时为 None，按 input + output 计
    pub total_tokens: Option<u64>,
}

impl ExchangeUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: None,
        }
    }

    pub fn total(&self) -> u64 {
        self.total_tokens
            .unwrap_or(self.input_tokens + self.output_tokens)
    }
}

/// 累计用量计数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub requests: u64,
}

impl UsageCounters {
    /// 记录一次模型往返（请求数 +1）
    pub fn record(&mut self, usage: &ExchangeUsage) {
        self.input_tokens = self.input_tokens.saturating_add(usage.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(usage.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(usage.total());
        self.requests = self.requests.saturating_add(1);
    }

    /// 把另一份计数（如单次 turn 的增量）并入
    pub fn merge(&mut self, other: &UsageCounters) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.requests = self.requests.saturating_add(other.requests);
    }
}
