//! 进度上报与阶段计时.
//!
//! 两者都只是 advisory 的诊断通道, 不参与任何控制流.

use std::time::Instant;

use log::{debug, info};

/// 接收 0.0 到 1.0 分数进度的回调对象. 由调用方注入到各流水线.
pub trait ProgressSink: Sync {
    /// 上报当前进度, `fraction` 取值 0.0 到 1.0.
    fn report(&self, fraction: f64);
}

/// 丢弃所有进度上报.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    #[inline]
    fn report(&self, _fraction: f64) {}
}

/// 将进度上报写入 `log::debug!`.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, fraction: f64) {
        debug!("进度 {:.1}%", fraction * 100.0);
    }
}

/// 阶段计时器. 在工具入口创建一次, 以引用传入各流水线,
/// 所有阶段日志共享同一个起点.
#[derive(Debug)]
pub struct StageTimer {
    start: Instant,
}

impl StageTimer {
    /// 以当前时刻为起点创建计时器.
    #[inline]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// 起点到现在经过的秒数.
    #[inline]
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// 以 `info` 级别记录一条带相对时间戳的阶段日志.
    pub fn stage(&self, msg: &str) {
        info!("{:.2} {msg}", self.elapsed_secs());
    }
}

impl Default for StageTimer {
    fn default() -> Self {
        Self::new()
    }
}
