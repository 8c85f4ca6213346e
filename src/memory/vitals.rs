//! 会话 vitals：连续工具失败计数与 strain 信号
//!
//! loop 只返回本轮的失败序列（ToolFailureStreak），由调用方并入会话；
//! strain 随时间按半衰期衰减，供下游 wellbeing 子系统读取。

use serde::{Deserialize, Serialize};

/// 每次连续失败对 strain 的贡献
const STRAIN_PER_FAILURE: f32 = 0.2;

/// 单次 turn 内工具执行的失败序列摘要
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ToolFailureStreak {
    /// turn 结束时末尾连续失败次数
    pub trailing_failures: u32,
    /// 本 turn 内是否有过成功的工具调用（有则会话级连续计数重新开始）
    pub saw_success: bool,
}

impl ToolFailureStreak {
    pub fn record(&mut self, succeeded: bool) {
        if succeeded {
            self.saw_success = true;
            self.trailing_failures = 0;
        } else {
            self.trailing_failures += 1;
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionVitals {
    /// 跨 turn 的连续工具失败次数
    pub tool_failure_streak: u32,
    /// 0.0 ~ 1.0
    pub strain: f32,
}

impl SessionVitals {
    /// 将一次 turn 的失败序列并入会话
    pub fn fold(&mut self, streak: ToolFailureStreak) {
        if streak.saw_success {
            self.tool_failure_streak = streak.trailing_failures;
        } else {
            self.tool_failure_streak += streak.trailing_failures;
        }
        let pressure = (self.tool_failure_streak as f32 * STRAIN_PER_FAILURE).min(1.0);
        self.strain = self.strain.max(pressure);
    }

    /// 按经过时间衰减 strain（指数衰减，half_life_secs 为 0 时不衰减）
    pub fn decay(&mut self, elapsed_secs: f64, half_life_secs: u64) {
        if half_life_secs == 0 || elapsed_secs <= 0.0 {
            return;
        }
        let factor = 0.5f64.powf(elapsed_secs / half_life_secs as f64);
        self.strain = (self.strain as f64 * factor) as f32;
    }
}
