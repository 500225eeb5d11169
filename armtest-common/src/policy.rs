//! 资源清理策略

use crate::state::DeploymentState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 资源组清理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CleanupPolicy {
    /// 终态后立即删除（无论成功或失败）
    Always,
    /// 仅在成功时删除
    OnSuccess,
    /// 仅在失败时删除，保留成功的部署以便检查
    OnFailure,
    /// 从不自动删除
    Manual,
}

impl CleanupPolicy {
    /// 给定部署状态时策略是否允许删除
    pub fn permits(&self, state: DeploymentState) -> bool {
        match self {
            Self::Always => matches!(state, DeploymentState::Succeeded | DeploymentState::Failed),
            Self::OnSuccess => state == DeploymentState::Succeeded,
            Self::OnFailure => state == DeploymentState::Failed,
            Self::Manual => false,
        }
    }

    /// 资源组标签中的写法
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::OnSuccess => "on-success",
            Self::OnFailure => "on-failure",
            Self::Manual => "manual",
        }
    }
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self::OnSuccess
    }
}

impl fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl FromStr for CleanupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "always" | "immediate" => Ok(Self::Always),
            "onsuccess" => Ok(Self::OnSuccess),
            "onfailure" => Ok(Self::OnFailure),
            "manual" | "never" => Ok(Self::Manual),
            _ => Err(format!("未知的清理策略: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentState::*;

    #[test]
    fn test_policy_permits() {
        assert!(CleanupPolicy::Always.permits(Succeeded));
        assert!(CleanupPolicy::Always.permits(Failed));
        assert!(!CleanupPolicy::Always.permits(Polling));

        assert!(CleanupPolicy::OnSuccess.permits(Succeeded));
        assert!(!CleanupPolicy::OnSuccess.permits(Failed));

        assert!(CleanupPolicy::OnFailure.permits(Failed));
        assert!(!CleanupPolicy::OnFailure.permits(Succeeded));

        assert!(!CleanupPolicy::Manual.permits(Succeeded));
        assert!(!CleanupPolicy::Manual.permits(Failed));
    }

    #[test]
    fn test_cleaned_up_never_permitted() {
        for policy in [
            CleanupPolicy::Always,
            CleanupPolicy::OnSuccess,
            CleanupPolicy::OnFailure,
            CleanupPolicy::Manual,
        ] {
            assert!(!policy.permits(CleanedUp));
        }
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!("on-success".parse::<CleanupPolicy>().unwrap(), CleanupPolicy::OnSuccess);
        assert_eq!("OnFailure".parse::<CleanupPolicy>().unwrap(), CleanupPolicy::OnFailure);
        assert_eq!("ALWAYS".parse::<CleanupPolicy>().unwrap(), CleanupPolicy::Always);
        assert_eq!("manual".parse::<CleanupPolicy>().unwrap(), CleanupPolicy::Manual);
        assert!("sometimes".parse::<CleanupPolicy>().is_err());
    }
}
