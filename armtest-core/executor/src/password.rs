//! 管理员密码策略

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::{ExecutorError, Result};

/// 读取密码的环境变量
pub const PASSWORD_ENV: &str = "NEO4J_ADMIN_PASSWORD";

const GENERATED_LENGTH: usize = 24;
const MIN_RECOMMENDED_LENGTH: usize = 12;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#%^*-_=+";

/// 密码策略
///
/// 配置文件中的写法：`generate`、`environment`、`fixed:<value>`。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PasswordStrategy {
    /// 每次部署随机生成
    Generate,
    /// 从 `NEO4J_ADMIN_PASSWORD` 读取
    Environment,
    /// 固定值
    Fixed(String),
}

impl Default for PasswordStrategy {
    fn default() -> Self {
        Self::Generate
    }
}

impl fmt::Debug for PasswordStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generate => write!(f, "Generate"),
            Self::Environment => write!(f, "Environment"),
            Self::Fixed(_) => write!(f, "Fixed(******)"),
        }
    }
}

impl FromStr for PasswordStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "generate" => Ok(Self::Generate),
            "environment" | "env" => Ok(Self::Environment),
            other => match other.strip_prefix("fixed:") {
                Some(value) if !value.is_empty() => Ok(Self::Fixed(value.to_string())),
                _ => Err(format!("未知的密码策略: {}", other)),
            },
        }
    }
}

impl TryFrom<String> for PasswordStrategy {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PasswordStrategy> for String {
    fn from(strategy: PasswordStrategy) -> Self {
        match strategy {
            PasswordStrategy::Generate => "generate".to_string(),
            PasswordStrategy::Environment => "environment".to_string(),
            PasswordStrategy::Fixed(value) => format!("fixed:{}", value),
        }
    }
}

impl PasswordStrategy {
    /// 按策略取得密码
    pub fn resolve(&self) -> Result<String> {
        match self {
            Self::Generate => Ok(generate_password(GENERATED_LENGTH)),
            Self::Environment => {
                let password = std::env::var(PASSWORD_ENV).map_err(|_| {
                    ExecutorError::Configuration(format!("环境变量 {} 未设置", PASSWORD_ENV))
                })?;
                if password.len() < MIN_RECOMMENDED_LENGTH {
                    warn!("{} 长度小于 {} 个字符", PASSWORD_ENV, MIN_RECOMMENDED_LENGTH);
                }
                Ok(password)
            }
            Self::Fixed(value) => Ok(value.clone()),
        }
    }
}

/// 生成至少包含小写、大写、数字、特殊字符各一个的随机密码
pub fn generate_password(length: usize) -> String {
    let length = length.max(4);
    let mut rng = rand::thread_rng();
    let all: Vec<u8> = [LOWER, UPPER, DIGITS, SPECIAL].concat();

    let mut chars: Vec<u8> = [LOWER, UPPER, DIGITS, SPECIAL]
        .iter()
        .map(|set| set[rng.gen_range(0..set.len())])
        .collect();
    while chars.len() < length {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);

    String::from_utf8_lossy(&chars).to_string()
}
