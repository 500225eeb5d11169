//! 功能验证结果

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 验证失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationFailure {
    /// 重试耗尽仍无法连接
    Unreachable,
    /// 已连接但功能断言失败
    AssertionFailed,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "Unreachable"),
            Self::AssertionFailed => write!(f, "ValidationAssertionFailed"),
        }
    }
}

/// 单条断言
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Assertion {
    pub fn pass(name: impl Into<String>) -> Self {
        Self { name: name.into(), passed: true, detail: None }
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { name: name.into(), passed: false, detail: Some(detail.into()) }
    }
}

/// 验证结果（创建后不可变，追加到部署记录历史）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub pass: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ValidationFailure>,
    pub assertions: Vec<Assertion>,
    /// 采集的诊断文本（连接错误、重试日志等）
    #[serde(default)]
    pub diagnostics: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ValidationResult {
    /// 根据断言列表汇总结果
    pub fn from_assertions(
        assertions: Vec<Assertion>,
        diagnostics: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let pass = !assertions.is_empty() && assertions.iter().all(|a| a.passed);
        Self {
            pass,
            reason: if pass { None } else { Some(ValidationFailure::AssertionFailed) },
            assertions,
            diagnostics,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// 连接不可达
    pub fn unreachable(diagnostics: Vec<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            pass: false,
            reason: Some(ValidationFailure::Unreachable),
            assertions: vec![Assertion::fail("connect", "重试耗尽仍无法连接")],
            diagnostics,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed_assertions(&self) -> impl Iterator<Item = &Assertion> {
        self.assertions.iter().filter(|a| !a.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_passed() {
        let result = ValidationResult::from_assertions(
            vec![Assertion::pass("connect"), Assertion::pass("write")],
            vec![],
            Utc::now(),
        );
        assert!(result.pass);
        assert!(result.reason.is_none());
    }

    #[test]
    fn test_one_failed() {
        let result = ValidationResult::from_assertions(
            vec![Assertion::pass("connect"), Assertion::fail("read-back", "mismatch")],
            vec![],
            Utc::now(),
        );
        assert!(!result.pass);
        assert_eq!(result.reason, Some(ValidationFailure::AssertionFailed));
        assert_eq!(result.failed_assertions().count(), 1);
    }

    #[test]
    fn test_empty_assertions_do_not_pass() {
        let result = ValidationResult::from_assertions(vec![], vec![], Utc::now());
        assert!(!result.pass);
    }

    #[test]
    fn test_unreachable() {
        let result = ValidationResult::unreachable(vec!["connection refused".into()], Utc::now());
        assert!(!result.pass);
        assert_eq!(result.reason, Some(ValidationFailure::Unreachable));
    }
}
