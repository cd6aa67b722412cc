//! CRON表达式求值
//!
//! 六个字段：秒 分 时 日 月 周。日与周必须恰好有一个是 `?`。
//!
//! 下一次触发时间在触发器所在时区的本地时间上逐字段推进搜索，
//! 每次推进后重新校验所有字段：
//! - 夏令时跳过的本地时间不存在，直接跳过
//! - 夏令时回拨产生的重复本地时间取第一个晚于查询时刻的实例
//! - 搜索范围为四年，超出返回 `NoFutureFireTime`

mod field;

use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;

use jobsched_core::{SchedulerError, SchedulerResult};

use field::{DayOfMonthRule, DayOfWeekRule, ValueSet};

/// 搜索范围（天）
const SEARCH_HORIZON_DAYS: i64 = 4 * 366;

/// 解析时区名称，例如 `Asia/Shanghai`
pub fn parse_timezone(name: &str) -> SchedulerResult<Tz> {
    name.parse::<Tz>().map_err(|_| SchedulerError::ParseError {
        expr: name.to_string(),
        message: format!("未知的时区 '{}'", name),
    })
}

/// 解析后的CRON表达式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    seconds: ValueSet,
    minutes: ValueSet,
    hours: ValueSet,
    days_of_month: DayOfMonthRule,
    months: ValueSet,
    days_of_week: DayOfWeekRule,
}

impl CronExpression {
    pub fn parse(expr: &str) -> SchedulerResult<Self> {
        let parse_error = |message: String| SchedulerError::ParseError {
            expr: expr.to_string(),
            message,
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(parse_error(format!(
                "需要 6 个字段（秒 分 时 日 月 周），实际为 {} 个",
                fields.len()
            )));
        }

        for (index, field) in fields.iter().enumerate() {
            if field.contains('?') && (*field != "?" || !(index == 3 || index == 5)) {
                return Err(parse_error(format!("'?' 只能单独用于日或周字段: '{}'", field)));
            }
        }

        let days_of_month = field::parse_day_of_month(fields[3]).map_err(parse_error)?;
        let days_of_week = field::parse_day_of_week(fields[5]).map_err(parse_error)?;

        match (&days_of_month, &days_of_week) {
            (DayOfMonthRule::Unconstrained, DayOfWeekRule::Unconstrained) => {
                return Err(parse_error("日和周字段不能同时为 '?'".to_string()));
            }
            (DayOfMonthRule::Unconstrained, _) | (_, DayOfWeekRule::Unconstrained) => {}
            _ => {
                return Err(parse_error(
                    "日和周字段必须有一个为 '?'，不支持同时指定".to_string(),
                ));
            }
        }

        Ok(Self {
            source: expr.to_string(),
            seconds: field::parse_values(fields[0], &field::SECOND).map_err(parse_error)?,
            minutes: field::parse_values(fields[1], &field::MINUTE).map_err(parse_error)?,
            hours: field::parse_values(fields[2], &field::HOUR).map_err(parse_error)?,
            days_of_month,
            months: field::parse_values(fields[4], &field::MONTH).map_err(parse_error)?,
            days_of_week,
        })
    }

    /// 原始表达式文本
    pub fn expression(&self) -> &str {
        &self.source
    }

    /// 严格晚于 `after` 的下一次触发时间
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> SchedulerResult<DateTime<Utc>> {
        let local_after = after.with_timezone(&tz).naive_local();
        let limit = local_after + Duration::days(SEARCH_HORIZON_DAYS);

        // 从下一个整秒开始
        let mut t = local_after.with_nanosecond(0).unwrap_or(local_after) + Duration::seconds(1);

        while t <= limit {
            if !self.months.contains(t.month()) {
                t = start_of_next_month(t.date());
                continue;
            }
            if !self.day_matches(t.date()) {
                t = start_of_day(t.date() + Duration::days(1));
                continue;
            }
            match self.hours.next_from(t.hour()) {
                Some(hour) if hour == t.hour() => {}
                Some(hour) => {
                    t = at_time(t.date(), hour, 0, 0);
                    continue;
                }
                None => {
                    t = start_of_day(t.date() + Duration::days(1));
                    continue;
                }
            }
            match self.minutes.next_from(t.minute()) {
                Some(minute) if minute == t.minute() => {}
                Some(minute) => {
                    t = at_time(t.date(), t.hour(), minute, 0);
                    continue;
                }
                None => {
                    t = at_time(t.date(), t.hour(), 0, 0) + Duration::hours(1);
                    continue;
                }
            }
            match self.seconds.next_from(t.second()) {
                Some(second) if second == t.second() => {}
                Some(second) => {
                    t = at_time(t.date(), t.hour(), t.minute(), second);
                    continue;
                }
                None => {
                    t = at_time(t.date(), t.hour(), t.minute(), 0) + Duration::minutes(1);
                    continue;
                }
            }

            if let Some(instant) = resolve_local(&tz, t, after) {
                return Ok(instant);
            }
            t += Duration::seconds(1);
        }

        Err(SchedulerError::NoFutureFireTime {
            expr: self.source.clone(),
        })
    }

    /// 从 `after` 开始的后续 `count` 个触发时间
    pub fn upcoming(
        &self,
        after: DateTime<Utc>,
        tz: Tz,
        count: usize,
    ) -> SchedulerResult<Vec<DateTime<Utc>>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = after;
        for _ in 0..count {
            cursor = self.next_after(cursor, tz)?;
            times.push(cursor);
        }
        Ok(times)
    }

    /// 给定时刻在时区 `tz` 下是否满足表达式
    pub fn matches(&self, at: DateTime<Utc>, tz: Tz) -> bool {
        let local = at.with_timezone(&tz).naive_local();
        self.months.contains(local.month())
            && self.day_matches(local.date())
            && self.hours.contains(local.hour())
            && self.minutes.contains(local.minute())
            && self.seconds.contains(local.second())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        match self.days_of_month {
            DayOfMonthRule::Days(days) => days.contains(date.day()),
            DayOfMonthRule::LastDay { offset } => {
                let last = last_day_of_month(date);
                last > offset && date.day() == last - offset
            }
            DayOfMonthRule::Unconstrained => match self.days_of_week {
                DayOfWeekRule::Days(days) => days.contains(date.weekday().num_days_from_sunday()),
                DayOfWeekRule::Unconstrained => true,
            },
        }
    }
}

impl FromStr for CronExpression {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// 把本地时间映射回UTC，跳过不存在的时间，重复时间取第一个晚于 `after` 的实例
fn resolve_local(tz: &Tz, local: NaiveDateTime, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)).filter(|t| *t > after),
        LocalResult::Ambiguous(earliest, latest) => [earliest, latest]
            .into_iter()
            .map(|dt| dt.with_timezone(&Utc))
            .find(|t| *t > after),
        LocalResult::None => None,
    }
}

fn at_time(date: NaiveDate, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(hour, minute, second).unwrap_or(NaiveTime::MIN);
    date.and_time(time)
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MAX)
}

fn start_of_next_month(date: NaiveDate) -> NaiveDateTime {
    start_of_day(first_of_next_month(date))
}

fn last_day_of_month(date: NaiveDate) -> u32 {
    first_of_next_month(date)
        .pred_opt()
        .map(|d| d.day())
        .unwrap_or(31)
}
