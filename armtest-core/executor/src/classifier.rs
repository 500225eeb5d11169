//! 错误分类器
//!
//! 把 provider 的原始诊断文本映射到有限的错误类别。规则按顺序匹配，
//! 第一个命中的规则生效；无法识别的内容原样保留为 `Unknown`。

use armtest_common::ErrorClass;
use armtest_provider::OperationError;
use regex::Regex;
use std::sync::LazyLock;

const TOOLING_GLITCH_SIGNATURE: &str = "The content for this response was already consumed";

const TEMPLATE_CODES: [&str; 4] = [
    "InvalidTemplateDeployment",
    "InvalidTemplate",
    "InvalidParameter",
    "ParameterValidationFailed",
];

const REMOTE_FAILURE_CODES: [&str; 5] = [
    "QuotaExceeded",
    "ResourceNotFound",
    "Conflict",
    "DeploymentFailed",
    "ProvisioningFailed",
];

struct ClassifierPatterns {
    /// does not have permission to perform action 'Microsoft.Authorization/roleAssignments/write'
    permission: Regex,
    /// 模板错误里的 `Message: ...`
    message: Regex,
    /// JSON 错误体中的 "message": "..."
    json_message: Regex,
}

fn build_patterns() -> Option<ClassifierPatterns> {
    Some(ClassifierPatterns {
        permission: Regex::new(r"does not have (?:authorization|permission) to perform action '([^']+)'").ok()?,
        message: Regex::new(r"Message:\s*(.+)").ok()?,
        json_message: Regex::new(r#""message"\s*:\s*"([^"]+)""#).ok()?,
    })
}

static PATTERNS: LazyLock<Option<ClassifierPatterns>> = LazyLock::new(build_patterns);

/// 错误分类器
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// 对原始诊断分类
    pub fn classify(&self, raw: &str) -> ErrorClass {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return ErrorClass::Unknown { raw: String::new() };
        }

        let patterns = PATTERNS.as_ref();

        // 1. 权限
        if let Some(action) = patterns
            .and_then(|p| p.permission.captures(trimmed))
            .and_then(|c| c.get(1))
        {
            return ErrorClass::AuthorizationDenied {
                action: action.as_str().to_string(),
            };
        }
        if trimmed.contains("AuthorizationFailed") {
            return ErrorClass::AuthorizationDenied {
                action: "unknown".to_string(),
            };
        }

        // 2. 已知的 CLI 缺陷签名
        if trimmed.contains(TOOLING_GLITCH_SIGNATURE) {
            return ErrorClass::TransientToolingGlitch;
        }

        // 3. 模板/参数错误
        if TEMPLATE_CODES.iter().any(|code| trimmed.contains(code)) {
            return ErrorClass::TemplateInvalid {
                message: extract_message(trimmed),
            };
        }

        // 4. 真实的远端失败
        if let Some(code) = REMOTE_FAILURE_CODES.iter().find(|code| trimmed.contains(*code)) {
            let message = extract_message(trimmed);
            let reason = if message.contains(code) {
                message
            } else {
                format!("{}: {}", code, message)
            };
            return ErrorClass::RemoteFailure { reason };
        }

        ErrorClass::Unknown {
            raw: raw.to_string(),
        }
    }

    /// 把失败的部署操作汇总为远端失败原因
    pub fn summarize_operations(&self, operations: &[OperationError]) -> Option<ErrorClass> {
        if operations.is_empty() {
            return None;
        }
        let reason = operations
            .iter()
            .map(|op| op.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Some(ErrorClass::RemoteFailure { reason })
    }
}

/// 取出人类可读的错误消息，找不到时返回首行
fn extract_message(raw: &str) -> String {
    let patterns = PATTERNS.as_ref();
    let found = patterns
        .and_then(|p| p.message.captures(raw).or_else(|| p.json_message.captures(raw)))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string());

    found.unwrap_or_else(|| {
        raw.lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or(raw)
            .to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(raw: &str) -> ErrorClass {
        ErrorClassifier::new().classify(raw)
    }

    #[test]
    fn test_patterns_compile() {
        assert!(build_patterns().is_some());
        assert!(PATTERNS.is_some());
    }

    #[test]
    fn test_authorization_with_action() {
        let raw = "ERROR: (AuthorizationFailed) The client 'ci@example.com' with object id 'x' does not have \
                   permission to perform action 'Microsoft.Authorization/roleAssignments/write' over scope '/subscriptions/y'";
        assert_eq!(
            classify(raw),
            ErrorClass::AuthorizationDenied {
                action: "Microsoft.Authorization/roleAssignments/write".into()
            }
        );
    }

    #[test]
    fn test_authorization_short_action() {
        let raw = "does not have permission to perform action 'role/write'";
        assert_eq!(classify(raw), ErrorClass::AuthorizationDenied { action: "role/write".into() });
    }

    #[test]
    fn test_authorization_failed_without_action() {
        assert!(matches!(
            classify("Code: AuthorizationFailed"),
            ErrorClass::AuthorizationDenied { .. }
        ));
    }

    #[test]
    fn test_tooling_glitch() {
        let raw = "ERROR: The content for this response was already consumed";
        assert_eq!(classify(raw), ErrorClass::TransientToolingGlitch);
        assert!(classify(raw).needs_reconciliation());
    }

    #[test]
    fn test_template_invalid_message() {
        let raw = "ERROR: InvalidTemplateDeployment\nMessage: The value of parameter nodeCount is not allowed.";
        assert_eq!(
            classify(raw),
            ErrorClass::TemplateInvalid {
                message: "The value of parameter nodeCount is not allowed.".into()
            }
        );
    }

    #[test]
    fn test_template_invalid_json() {
        let raw = r#"{"error": {"code": "InvalidParameter", "message": "diskSize must be at least 32"}}"#;
        assert_eq!(
            classify(raw),
            ErrorClass::TemplateInvalid { message: "diskSize must be at least 32".into() }
        );
    }

    #[test]
    fn test_remote_failure() {
        let raw = "Code: QuotaExceeded\nMessage: Operation could not be completed as it results in exceeding approved standardESv5Family Cores quota.";
        match classify(raw) {
            ErrorClass::RemoteFailure { reason } => {
                assert!(reason.starts_with("QuotaExceeded"));
                assert!(reason.contains("Cores quota"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_keeps_raw() {
        let raw = "something went sideways\nwith details";
        assert_eq!(classify(raw), ErrorClass::Unknown { raw: raw.into() });
        assert_eq!(classify("   "), ErrorClass::Unknown { raw: String::new() });
    }

    #[test]
    fn test_authorization_wins_over_glitch() {
        let raw = "The content for this response was already consumed\n\
                   does not have permission to perform action 'role/write'";
        assert!(matches!(classify(raw), ErrorClass::AuthorizationDenied { .. }));
    }

    #[test]
    fn test_summarize_operations() {
        let classifier = ErrorClassifier::new();
        assert!(classifier.summarize_operations(&[]).is_none());

        let ops = vec![OperationError {
            resource_name: "vm0".into(),
            resource_type: "Microsoft.Compute/virtualMachines".into(),
            status_code: "Conflict".into(),
            message: "SKU not available".into(),
        }];
        match classifier.summarize_operations(&ops) {
            Some(ErrorClass::RemoteFailure { reason }) => assert!(reason.contains("vm0")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
