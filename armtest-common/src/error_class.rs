//! 远端诊断错误分类

use crate::state::FailureReason;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误分类结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum ErrorClass {
    /// 缺少对某个操作的权限（保留操作名原文）
    AuthorizationDenied { action: String },
    /// 模板或参数的结构/类型错误
    TemplateInvalid { message: String },
    /// 已知的 provider CLI 缺陷签名，需要对账而非直接判定失败
    TransientToolingGlitch,
    /// 真实的部署失败
    RemoteFailure { reason: String },
    /// 未识别，保留完整原始输出
    Unknown { raw: String },
}

impl ErrorClass {
    /// 是否需要通过重新查询远端状态来确认
    pub fn needs_reconciliation(&self) -> bool {
        matches!(self, Self::TransientToolingGlitch | Self::Unknown { .. })
    }

    /// 转换为记录上的失败原因
    pub fn to_failure_reason(&self) -> FailureReason {
        match self {
            Self::AuthorizationDenied { action } => FailureReason::AuthorizationDenied(action.clone()),
            Self::TemplateInvalid { message } => FailureReason::TemplateInvalid(message.clone()),
            Self::TransientToolingGlitch => {
                FailureReason::Unknown("provider CLI 报告已消费的响应且部署不存在".to_string())
            }
            Self::RemoteFailure { reason } => FailureReason::RemoteFailure(reason.clone()),
            Self::Unknown { raw } => FailureReason::Unknown(raw.clone()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthorizationDenied { .. } => "AuthorizationDenied",
            Self::TemplateInvalid { .. } => "TemplateInvalid",
            Self::TransientToolingGlitch => "TransientToolingGlitch",
            Self::RemoteFailure { .. } => "RemoteFailure",
            Self::Unknown { .. } => "Unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthorizationDenied { action } => write!(f, "AuthorizationDenied({})", action),
            Self::TemplateInvalid { message } => write!(f, "TemplateInvalid({})", message),
            Self::TransientToolingGlitch => write!(f, "TransientToolingGlitch"),
            Self::RemoteFailure { reason } => write!(f, "RemoteFailure({})", reason),
            Self::Unknown { raw } => write!(f, "Unknown({})", raw),
        }
    }
}
