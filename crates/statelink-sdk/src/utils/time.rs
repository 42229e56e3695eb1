//! 时间处理工具模块
//!
//! 提供可注入的时钟和按时区计算日历边界的功能
//!
//! # 设计原则
//!
//! - **存储层**: 所有时间字段使用 UTC 毫秒时间戳（i64）
//! - **业务层**: 统一通过 [`Clock`] 取当前时间，测试中替换为 [`ManualClock`]
//! - **日历边界**: 每日重置按配置时区的本地午夜计算，而不是 24 小时滚动窗口

use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicI64, Ordering};

/// 时间源
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// 当前 UTC 时间
    fn now_utc(&self) -> DateTime<Utc>;

    /// 当前 UTC 毫秒时间戳
    fn now_millis(&self) -> i64 {
        self.now_utc().timestamp_millis()
    }
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的时钟，用于测试和离线模拟
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::from_millis(start.timestamp_millis())
    }

    pub fn from_millis(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// 向前推进
    pub fn advance(&self, by: std::time::Duration) {
        self.millis.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.set_millis(at.timestamp_millis());
    }

    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_millis())
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// 时间格式化与日历计算
pub struct TimeFormatter;

impl TimeFormatter {
    /// 解析 IANA 时区名，例如 "Europe/London"
    pub fn parse_timezone(name: &str) -> Option<Tz> {
        name.parse::<Tz>().ok()
    }

    /// `now` 在指定时区下所属的日历日
    pub fn local_day(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
        now.with_timezone(&tz).date_naive()
    }

    /// 指定日历日在时区内的起点（UTC）
    ///
    /// 夏令时切换恰好发生在午夜的时区里，本地 00:00 可能不存在，
    /// 此时取之后第一个有效的本地时刻；重复出现时取较早者。
    pub fn start_of_local_day(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        match tz.from_local_datetime(&midnight) {
            LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
            LocalResult::None => (1..=180).find_map(|minutes| {
                tz.from_local_datetime(&(midnight + Duration::minutes(minutes)))
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
        }
    }

    /// 严格晚于 `now` 的下一个本地午夜（UTC）
    pub fn next_local_midnight(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        Self::local_day(now, tz)
            .succ_opt()
            .and_then(|tomorrow| Self::start_of_local_day(tomorrow, tz))
            .filter(|next| *next > now)
            .unwrap_or_else(|| now + Duration::hours(24))
    }

    /// 距离 `target` 还有多久，已过去则为零
    pub fn duration_until(now: DateTime<Utc>, target: DateTime<Utc>) -> std::time::Duration {
        (target - now).to_std().unwrap_or(std::time::Duration::ZERO)
    }

    /// 分钟数格式化为 "Xh Ym"
    pub fn format_playtime(minutes: u64) -> String {
        format!("{}h {}m", minutes / 60, minutes % 60)
    }

    /// 毫秒时间戳格式化为时区内的 "YYYY-MM-DD HH:MM:SS"
    pub fn format_standard(utc_timestamp_ms: i64, tz: Tz) -> String {
        let dt = Utc.timestamp_millis_opt(utc_timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now);
        dt.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
