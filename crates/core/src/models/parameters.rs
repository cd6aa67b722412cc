//! 类型化作业参数
//!
//! 作业参数以有序键值表保存，每个值属于封闭的参数类型集合之一。作业实现通过
//! [`ParameterSpec`] 声明自己接受的参数，定义在创建和派发时都按声明校验。

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 参数类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterKind {
    String,
    Integer,
    Boolean,
    Enum,
    Date,
    Json,
    LongText,
}

text_enum!(ParameterKind {
    String => "STRING",
    Integer => "INTEGER",
    Boolean => "BOOLEAN",
    Enum => "ENUM",
    Date => "DATE",
    Json => "JSON",
    LongText => "LONG_TEXT",
});

/// 参数值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Enum(String),
    Date(NaiveDate),
    Json(serde_json::Value),
    LongText(String),
}

impl ParameterValue {
    pub fn kind(&self) -> ParameterKind {
        match self {
            ParameterValue::String(_) => ParameterKind::String,
            ParameterValue::Integer(_) => ParameterKind::Integer,
            ParameterValue::Boolean(_) => ParameterKind::Boolean,
            ParameterValue::Enum(_) => ParameterKind::Enum,
            ParameterValue::Date(_) => ParameterKind::Date,
            ParameterValue::Json(_) => ParameterKind::Json,
            ParameterValue::LongText(_) => ParameterKind::LongText,
        }
    }
}

/// 有序的类型化参数表
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct JobParameters(BTreeMap<String, ParameterValue>);

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParameterValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    /// 文本类参数（STRING / ENUM / LONG_TEXT）
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.0.get(name)? {
            ParameterValue::String(s) | ParameterValue::Enum(s) | ParameterValue::LongText(s) => {
                Some(s.as_str())
            }
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            ParameterValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.0.get(name)? {
            ParameterValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_date(&self, name: &str) -> Option<NaiveDate> {
        match self.0.get(name)? {
            ParameterValue::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_json(&self, name: &str) -> Option<&serde_json::Value> {
        match self.0.get(name)? {
            ParameterValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> SchedulerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> SchedulerResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }
}

impl FromIterator<(String, ParameterValue)> for JobParameters {
    fn from_iter<T: IntoIterator<Item = (String, ParameterValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// 作业参数声明
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    pub display_name: String,
    pub description: String,
    pub required: bool,
    pub default_value: Option<ParameterValue>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    /// ENUM 类型的可选值
    pub options: Vec<String>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            kind,
            description: String::new(),
            required: false,
            default_value: None,
            min: None,
            max: None,
            options: Vec::new(),
        }
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: ParameterValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    fn check(&self, value: &ParameterValue) -> Option<String> {
        if value.kind() != self.kind {
            return Some(format!(
                "参数 {} 类型应为 {}，实际为 {}",
                self.display_name,
                self.kind,
                value.kind()
            ));
        }

        match value {
            ParameterValue::Integer(v) => {
                if self.min.is_some_and(|min| *v < min) || self.max.is_some_and(|max| *v > max) {
                    return Some(format!(
                        "参数 {} 取值 {} 超出范围 [{}, {}]",
                        self.display_name,
                        v,
                        self.min.map_or("-∞".to_string(), |m| m.to_string()),
                        self.max.map_or("+∞".to_string(), |m| m.to_string()),
                    ));
                }
            }
            ParameterValue::Enum(v) => {
                if !self.options.is_empty() && !self.options.iter().any(|o| o == v) {
                    return Some(format!(
                        "参数 {} 取值 {} 不在可选项 {:?} 中",
                        self.display_name, v, self.options
                    ));
                }
            }
            ParameterValue::String(v) => {
                if self.required && v.trim().is_empty() {
                    return Some(format!("参数 {} 不能为空", self.display_name));
                }
            }
            _ => {}
        }

        None
    }
}

/// 按参数声明校验参数表，收集所有错误
///
/// 未声明的参数会被保留且不做检查。
pub fn check_parameters(specs: &[ParameterSpec], parameters: &JobParameters) -> Vec<String> {
    let mut errors = Vec::new();

    for spec in specs {
        match parameters.get(&spec.name) {
            Some(value) => {
                if let Some(err) = spec.check(value) {
                    errors.push(err);
                }
            }
            None if spec.required && spec.default_value.is_none() => {
                errors.push(format!("缺少必填参数: {}", spec.display_name));
            }
            None => {}
        }
    }

    errors
}

/// 校验参数表，失败时合并为一个 `Validation` 错误
pub fn validate_parameters(
    specs: &[ParameterSpec],
    parameters: &JobParameters,
) -> SchedulerResult<()> {
    let errors = check_parameters(specs, parameters);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchedulerError::Validation(errors.join("; ")))
    }
}

/// 为缺失的参数补齐默认值
pub fn apply_defaults(specs: &[ParameterSpec], parameters: &mut JobParameters) {
    for spec in specs {
        if let Some(default) = &spec.default_value {
            if !parameters.contains(&spec.name) {
                parameters.insert(spec.name.clone(), default.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("batchSize", ParameterKind::Integer)
                .display_name("Batch Size")
                .range(1, 1000)
                .default_value(ParameterValue::Integer(100)),
            ParameterSpec::new("mode", ParameterKind::Enum)
                .required()
                .options(["FULL", "DELTA"]),
            ParameterSpec::new("dryRun", ParameterKind::Boolean),
        ]
    }

    #[test]
    fn test_valid_parameters_pass() {
        let params = JobParameters::new()
            .with("mode", ParameterValue::Enum("FULL".to_string()))
            .with("batchSize", ParameterValue::Integer(10));
        assert!(validate_parameters(&specs(), &params).is_ok());
    }

    #[test]
    fn test_missing_required_parameter() {
        let errors = check_parameters(&specs(), &JobParameters::new());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("mode"));
    }

    #[test]
    fn test_out_of_range_and_wrong_kind() {
        let params = JobParameters::new()
            .with("mode", ParameterValue::Enum("PARTIAL".to_string()))
            .with("batchSize", ParameterValue::Integer(5000))
            .with("dryRun", ParameterValue::String("yes".to_string()));
        let errors = check_parameters(&specs(), &params);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_apply_defaults_keeps_explicit_values() {
        let mut params = JobParameters::new().with("mode", ParameterValue::Enum("FULL".into()));
        apply_defaults(&specs(), &mut params);
        assert_eq!(params.get_i64("batchSize"), Some(100));

        let mut explicit = JobParameters::new().with("batchSize", ParameterValue::Integer(7));
        apply_defaults(&specs(), &mut explicit);
        assert_eq!(explicit.get_i64("batchSize"), Some(7));
    }

    #[test]
    fn test_json_representation_is_tagged() {
        let params = JobParameters::new()
            .with("since", ParameterValue::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()));
        let raw = params.to_json().unwrap();
        assert!(raw.contains("\"kind\":\"DATE\""));
        assert_eq!(JobParameters::from_json(&raw).unwrap(), params);
        assert!(JobParameters::from_json("").unwrap().is_empty());
    }
}
