//! 单个CRON字段的解析

/// 字段取值集合，按位存储，最大取值 63
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ValueSet(u64);

impl ValueSet {
    pub(crate) fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }

    /// 不小于 `from` 的最小取值
    pub(crate) fn next_from(&self, from: u32) -> Option<u32> {
        if from >= 64 {
            return None;
        }
        let masked = self.0 & (u64::MAX << from);
        (masked != 0).then(|| masked.trailing_zeros())
    }

    fn insert(&mut self, value: u32) {
        self.0 |= 1u64 << value;
    }

    fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// 字段的取值范围和可用的名称别名
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldKind {
    pub name: &'static str,
    pub min: u32,
    pub max: u32,
    /// `*` 覆盖的起点；星期字段的 0 只是 SUN 的别名，不参与 `*` 的步进
    wildcard_min: u32,
    names: &'static [&'static str],
    /// `names[0]` 对应的数值
    names_base: u32,
}

pub(crate) const SECOND: FieldKind = FieldKind {
    name: "秒",
    min: 0,
    max: 59,
    wildcard_min: 0,
    names: &[],
    names_base: 0,
};

pub(crate) const MINUTE: FieldKind = FieldKind {
    name: "分",
    min: 0,
    max: 59,
    wildcard_min: 0,
    names: &[],
    names_base: 0,
};

pub(crate) const HOUR: FieldKind = FieldKind {
    name: "时",
    min: 0,
    max: 23,
    wildcard_min: 0,
    names: &[],
    names_base: 0,
};

pub(crate) const DAY_OF_MONTH: FieldKind = FieldKind {
    name: "日",
    min: 1,
    max: 31,
    wildcard_min: 1,
    names: &[],
    names_base: 0,
};

pub(crate) const MONTH: FieldKind = FieldKind {
    name: "月",
    min: 1,
    max: 12,
    wildcard_min: 1,
    names: &[
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
    names_base: 1,
};

/// 星期：1-7 对应 SUN-SAT，0 也表示 SUN
pub(crate) const DAY_OF_WEEK: FieldKind = FieldKind {
    name: "周",
    min: 0,
    max: 7,
    wildcard_min: 1,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
    names_base: 1,
};

impl FieldKind {
    fn value(&self, token: &str) -> Result<u32, String> {
        let upper = token.to_ascii_uppercase();
        if let Some(index) = self.names.iter().position(|n| *n == upper) {
            return Ok(self.names_base + index as u32);
        }

        let value: u32 = token
            .parse()
            .map_err(|_| format!("{}字段包含无法识别的取值 '{}'", self.name, token))?;
        if value < self.min || value > self.max {
            return Err(format!(
                "{}字段取值 {} 超出范围 {}-{}",
                self.name, value, self.min, self.max
            ));
        }
        Ok(value)
    }
}

/// 解析由 `*`、列表、范围、步长组成的字段
///
/// 范围起点大于终点时按环绕处理，例如 `FRI-MON`。
pub(crate) fn parse_values(field: &str, kind: &FieldKind) -> Result<ValueSet, String> {
    let mut set = ValueSet(0);

    for item in field.split(',') {
        if item.is_empty() {
            return Err(format!("{}字段包含空的列表项", kind.name));
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("{}字段的步长 '{}' 不是数字", kind.name, step))?;
                if step == 0 {
                    return Err(format!("{}字段的步长不能为 0", kind.name));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (kind.wildcard_min, kind.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (kind.value(a)?, kind.value(b)?)
        } else {
            let start = kind.value(range)?;
            // `a/b` 表示从 a 开始到最大值
            let end = if step.is_some() { kind.max } else { start };
            (start, end)
        };

        let span = if start <= end {
            end - start
        } else {
            (kind.max - start) + (end - kind.min) + 1
        };
        let step = step.unwrap_or(1);
        let width = kind.max - kind.min + 1;

        let mut offset = 0;
        while offset <= span {
            let value = kind.min + (start - kind.min + offset) % width;
            set.insert(value);
            offset += step;
        }
    }

    if set.is_empty() {
        return Err(format!("{}字段没有任何取值", kind.name));
    }
    Ok(set)
}

/// 日字段的规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DayOfMonthRule {
    Unconstrained,
    Days(ValueSet),
    /// `L` 为月末，`L-n` 为月末前 n 天
    LastDay { offset: u32 },
}

/// 周字段的规则，取值已归一到 0-6（SUN-SAT）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DayOfWeekRule {
    Unconstrained,
    Days(ValueSet),
}

pub(crate) fn parse_day_of_month(field: &str) -> Result<DayOfMonthRule, String> {
    if field == "?" {
        return Ok(DayOfMonthRule::Unconstrained);
    }

    let upper = field.to_ascii_uppercase();
    if upper == "L" {
        return Ok(DayOfMonthRule::LastDay { offset: 0 });
    }
    if let Some(offset) = upper.strip_prefix("L-") {
        let offset: u32 = offset
            .parse()
            .map_err(|_| format!("无效的月末偏移 '{}'", field))?;
        if offset > 30 {
            return Err(format!("月末偏移 {} 超出范围 0-30", offset));
        }
        return Ok(DayOfMonthRule::LastDay { offset });
    }
    if upper.contains('L') {
        return Err(format!("'L' 只能单独使用: '{}'", field));
    }

    parse_values(field, &DAY_OF_MONTH).map(DayOfMonthRule::Days)
}

pub(crate) fn parse_day_of_week(field: &str) -> Result<DayOfWeekRule, String> {
    if field == "?" {
        return Ok(DayOfWeekRule::Unconstrained);
    }

    let raw = parse_values(field, &DAY_OF_WEEK)?;
    let mut normalized = ValueSet(0);
    for value in 0..=7 {
        if raw.contains(value) {
            // 1-7 => 0-6，0 仍为周日
            normalized.insert(if value == 0 { 0 } else { value - 1 });
        }
    }
    Ok(DayOfWeekRule::Days(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(set: ValueSet, max: u32) -> Vec<u32> {
        (0..=max).filter(|v| set.contains(*v)).collect()
    }

    #[test]
    fn test_step_from_wildcard() {
        let set = parse_values("*/15", &MINUTE).unwrap();
        assert_eq!(values(set, 59), vec![0, 15, 30, 45]);
    }

    #[test]
    fn test_step_from_value_runs_to_max() {
        let set = parse_values("5/20", &SECOND).unwrap();
        assert_eq!(values(set, 59), vec![5, 25, 45]);
    }

    #[test]
    fn test_list_and_range_with_step() {
        let set = parse_values("1,10-14/2", &HOUR).unwrap();
        assert_eq!(values(set, 23), vec![1, 10, 12, 14]);
    }

    #[test]
    fn test_month_names() {
        let set = parse_values("JAN,mar-MAY", &MONTH).unwrap();
        assert_eq!(values(set, 12), vec![1, 3, 4, 5]);
    }

    #[test]
    fn test_wrapping_day_range() {
        let DayOfWeekRule::Days(set) = parse_day_of_week("FRI-MON").unwrap() else {
            panic!("expected explicit days");
        };
        // FRI=5, SAT=6, SUN=0, MON=1
        assert_eq!(values(set, 6), vec![0, 1, 5, 6]);
    }

    #[test]
    fn test_day_of_week_numbers() {
        let DayOfWeekRule::Days(set) = parse_day_of_week("2-6").unwrap() else {
            panic!("expected explicit days");
        };
        assert_eq!(values(set, 6), vec![1, 2, 3, 4, 5]);

        let DayOfWeekRule::Days(sunday) = parse_day_of_week("0,7").unwrap() else {
            panic!("expected explicit days");
        };
        assert_eq!(values(sunday, 6), vec![0, 6]);
    }

    #[test]
    fn test_day_of_week_wildcard_step_starts_at_sunday() {
        let DayOfWeekRule::Days(every_other) = parse_day_of_week("*/2").unwrap() else {
            panic!("expected explicit days");
        };
        // SUN, TUE, THU, SAT
        assert_eq!(values(every_other, 6), vec![0, 2, 4, 6]);

        let DayOfWeekRule::Days(every_third) = parse_day_of_week("*/3").unwrap() else {
            panic!("expected explicit days");
        };
        // SUN, WED, SAT
        assert_eq!(values(every_third, 6), vec![0, 3, 6]);

        let DayOfWeekRule::Days(all) = parse_day_of_week("*").unwrap() else {
            panic!("expected explicit days");
        };
        assert_eq!(values(all, 6), vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_last_day_tokens() {
        assert_eq!(
            parse_day_of_month("L").unwrap(),
            DayOfMonthRule::LastDay { offset: 0 }
        );
        assert_eq!(
            parse_day_of_month("L-3").unwrap(),
            DayOfMonthRule::LastDay { offset: 3 }
        );
        assert!(parse_day_of_month("1,L").is_err());
        assert!(parse_day_of_month("L-x").is_err());
    }

    #[test]
    fn test_rejects_out_of_range_and_garbage() {
        assert!(parse_values("60", &SECOND).is_err());
        assert!(parse_values("0", &MONTH).is_err());
        assert!(parse_values("*/0", &MINUTE).is_err());
        assert!(parse_values("1,,2", &MINUTE).is_err());
        assert!(parse_values("abc", &HOUR).is_err());
    }

    #[test]
    fn test_next_from() {
        let set = parse_values("10,20", &SECOND).unwrap();
        assert_eq!(set.next_from(0), Some(10));
        assert_eq!(set.next_from(10), Some(10));
        assert_eq!(set.next_from(11), Some(20));
        assert_eq!(set.next_from(21), None);
    }
}
