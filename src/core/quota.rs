//! 配额跟踪：每日 Reveal / 每日 Profile 浏览 / 每分钟吞吐
//!
//! 三个独立 scope，各自一个窗口（consumed / limit / reset 时刻）。
//! try_consume 为原子的 check-and-increment，失败即拒绝，调用方只能延后；
//! 消耗跨过 50% / 75% / 90% 阈值时通过 broadcast 发出非阻塞告警事件。

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Timelike, Utc};
use tokio::sync::broadcast;

/// 配额 scope：互相独立计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaScope {
    /// 每日 Reveal 次数（UTC 零点重置）
    DailyReveal,
    /// 每日 Profile 浏览次数（UTC 零点重置）
    DailyProfileView,
    /// 每分钟提交吞吐（整分钟边界翻滚重置）
    PerMinute,
}

impl std::fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuotaScope::DailyReveal => "daily_reveal",
            QuotaScope::DailyProfileView => "daily_profile_view",
            QuotaScope::PerMinute => "per_minute",
        };
        f.write_str(s)
    }
}

/// 各 scope 限额（来自配置）
#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub daily_reveal: u64,
    pub daily_profile_view: u64,
    pub per_minute: u64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            daily_reveal: 5000,
            daily_profile_view: 5000,
            per_minute: 600,
        }
    }
}

/// 配额告警事件：consumed 首次跨过某阈值时发出
#[derive(Debug, Clone)]
pub struct QuotaWarning {
    pub scope: QuotaScope,
    pub consumed: u64,
    pub limit: u64,
    /// 50 / 75 / 90
    pub threshold: u8,
}

const WARN_THRESHOLDS: [u8; 3] = [50, 75, 90];

/// 单 scope 窗口：consumed 不超过 limit，仅窗口重置时归零
struct Window {
    consumed: u64,
    limit: u64,
    resets_at: DateTime<Utc>,
    /// 本窗口内已告警的最高阈值，避免重复发事件
    warned_up_to: u8,
}

/// 配额跟踪器：注入给 Dispatcher，不做全局可变状态
pub struct QuotaTracker {
    windows: Mutex<HashMap<QuotaScope, Window>>,
    warn_tx: broadcast::Sender<QuotaWarning>,
}

/// 下一个 UTC 零点
fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc()
}

/// 下一个整分钟边界
fn next_minute_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    truncated + Duration::minutes(1)
}

fn window_reset(scope: QuotaScope, now: DateTime<Utc>) -> DateTime<Utc> {
    match scope {
        QuotaScope::DailyReveal | QuotaScope::DailyProfileView => next_utc_midnight(now),
        QuotaScope::PerMinute => next_minute_boundary(now),
    }
}

impl QuotaTracker {
    pub fn new(limits: QuotaLimits) -> Self {
        let now = Utc::now();
        Self::with_start(limits, now)
    }

    /// 以指定起始时刻建窗（测试用：便于构造跨窗口场景）
    pub fn with_start(limits: QuotaLimits, now: DateTime<Utc>) -> Self {
        let mut windows = HashMap::new();
        for (scope, limit) in [
            (QuotaScope::DailyReveal, limits.daily_reveal),
            (QuotaScope::DailyProfileView, limits.daily_profile_view),
            (QuotaScope::PerMinute, limits.per_minute),
        ] {
            windows.insert(
                scope,
                Window {
                    consumed: 0,
                    limit,
                    resets_at: window_reset(scope, now),
                    warned_up_to: 0,
                },
            );
        }
        let (warn_tx, _) = broadcast::channel(32);
        Self {
            windows: Mutex::new(windows),
            warn_tx,
        }
    }

    /// 订阅配额告警事件
    pub fn subscribe(&self) -> broadcast::Receiver<QuotaWarning> {
        self.warn_tx.subscribe()
    }

    /// 原子 check-and-increment；超限返回 false，计数绝不越过 limit
    pub fn try_consume(&self, scope: QuotaScope, amount: u64) -> bool {
        self.try_consume_at(scope, amount, Utc::now())
    }

    /// 指定时刻版本（测试用）
    pub fn try_consume_at(&self, scope: QuotaScope, amount: u64, now: DateTime<Utc>) -> bool {
        let mut windows = self.windows.lock().expect("quota lock poisoned");
        let win = windows.get_mut(&scope).expect("scope initialized in new");
        reset_window_if_expired(scope, win, now);

        if win.consumed + amount > win.limit {
            return false;
        }
        win.consumed += amount;

        // 阈值告警：只报本次新跨过的，warn 日志 + 非阻塞广播
        let pct = if win.limit == 0 {
            100
        } else {
            (win.consumed * 100 / win.limit) as u8
        };
        for threshold in WARN_THRESHOLDS {
            if threshold > win.warned_up_to && pct >= threshold {
                win.warned_up_to = threshold;
                let event = QuotaWarning {
                    scope,
                    consumed: win.consumed,
                    limit: win.limit,
                    threshold,
                };
                tracing::warn!(
                    scope = %scope,
                    consumed = win.consumed,
                    limit = win.limit,
                    threshold,
                    "Quota threshold crossed"
                );
                let _ = self.warn_tx.send(event);
            }
        }
        true
    }

    /// 剩余额度（会先做窗口过期检查）
    pub fn remaining(&self, scope: QuotaScope) -> u64 {
        self.remaining_at(scope, Utc::now())
    }

    pub fn remaining_at(&self, scope: QuotaScope, now: DateTime<Utc>) -> u64 {
        let mut windows = self.windows.lock().expect("quota lock poisoned");
        let win = windows.get_mut(&scope).expect("scope initialized in new");
        reset_window_if_expired(scope, win, now);
        win.limit - win.consumed
    }

    /// 手动触发窗口过期检查（调度循环每轮调用一次即可）
    pub fn reset_if_expired(&self, scope: QuotaScope) {
        let now = Utc::now();
        let mut windows = self.windows.lock().expect("quota lock poisoned");
        if let Some(win) = windows.get_mut(&scope) {
            reset_window_if_expired(scope, win, now);
        }
    }
}

fn reset_window_if_expired(scope: QuotaScope, win: &mut Window, now: DateTime<Utc>) {
    if now >= win.resets_at {
        win.consumed = 0;
        win.warned_up_to = 0;
        win.resets_at = window_reset(scope, now);
        tracing::debug!(scope = %scope, resets_at = %win.resets_at, "Quota window reset");
    }
}
