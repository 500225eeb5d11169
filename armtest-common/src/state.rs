//! 部署生命周期状态机

use serde::{Deserialize, Serialize};
use std::fmt;

/// 部署生命周期状态
///
/// 合法路径: `Pending → Validating → Submitted → Polling → Succeeded | Failed → CleanedUp`。
/// 状态转换不可逆。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentState {
    Pending,
    Validating,
    Submitted,
    Polling,
    Succeeded,
    Failed,
    CleanedUp,
}

impl DeploymentState {
    /// 是否为终态（不再有自动转换）
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::CleanedUp)
    }

    /// 是否处于远端进行中（已提交但尚未终结）
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Submitted | Self::Polling)
    }

    /// 检查 `self → next` 是否为合法转换
    ///
    /// `Pending → Failed` 仅用于提交前的本地配置错误；
    /// `Submitted → Failed` 发生在对账确认部署不存在之后。
    pub fn can_transition_to(&self, next: DeploymentState) -> bool {
        use DeploymentState::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Pending, Failed)
                | (Validating, Submitted)
                | (Validating, Failed)
                | (Submitted, Polling)
                | (Submitted, Failed)
                | (Polling, Succeeded)
                | (Polling, Failed)
                | (Succeeded, CleanedUp)
                | (Failed, CleanedUp)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Validating => "Validating",
            Self::Submitted => "Submitted",
            Self::Polling => "Polling",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::CleanedUp => "CleanedUp",
        }
    }

    /// 所有状态（报告统计使用）
    pub fn all() -> [DeploymentState; 7] {
        use DeploymentState::*;
        [Pending, Validating, Submitted, Polling, Succeeded, Failed, CleanedUp]
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 部署失败原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum FailureReason {
    /// 场景或参数配置错误，从未提交
    Configuration(String),
    /// 缺少对某个操作的权限
    AuthorizationDenied(String),
    /// 模板或参数结构错误
    TemplateInvalid(String),
    /// 远端真实的部署失败
    RemoteFailure(String),
    /// 轮询超过上限
    Timeout,
    /// 操作员取消（远端部署可能仍在运行）
    Cancelled,
    /// 无法识别的错误，保留原始输出
    Unknown(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "配置错误: {}", msg),
            Self::AuthorizationDenied(action) => write!(f, "权限不足: {}", action),
            Self::TemplateInvalid(msg) => write!(f, "模板无效: {}", msg),
            Self::RemoteFailure(msg) => write!(f, "远端失败: {}", msg),
            Self::Timeout => write!(f, "轮询超时"),
            Self::Cancelled => write!(f, "已取消"),
            Self::Unknown(raw) => write!(f, "未知错误: {}", raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentState::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [Pending, Validating, Submitted, Polling, Succeeded, CleanedUp];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_no_skipping_validation() {
        assert!(!Pending.can_transition_to(Submitted));
        assert!(!Pending.can_transition_to(Polling));
        assert!(!Validating.can_transition_to(Polling));
    }

    #[test]
    fn test_no_reverse_transitions() {
        for from in DeploymentState::all() {
            assert!(!from.can_transition_to(from), "{} self loop", from);
        }
        assert!(!Polling.can_transition_to(Submitted));
        assert!(!Succeeded.can_transition_to(Polling));
        assert!(!Failed.can_transition_to(Succeeded));
        assert!(!CleanedUp.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(Succeeded.is_terminal());
        assert!(Failed.is_terminal());
        assert!(CleanedUp.is_terminal());
        assert!(!Polling.is_terminal());
        assert!(Submitted.is_in_flight());
    }

    #[test]
    fn test_failure_reason_serialization() {
        let reason = FailureReason::AuthorizationDenied("role/write".to_string());
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("AuthorizationDenied"));
        let back: FailureReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reason);

        let json = serde_json::to_string(&FailureReason::Timeout).unwrap();
        assert_eq!(json, r#"{"kind":"Timeout"}"#);
    }
}
