//! CLI 命令处理模块

pub mod cleanup;
pub mod common; // 公共工具函数
pub mod deploy;
pub mod output;
pub mod progress; // 部署进度渲染
pub mod report;
pub mod setup;
pub mod status;
pub mod validate;
