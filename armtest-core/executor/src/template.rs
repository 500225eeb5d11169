//! 模板参数模式
//!
//! 只读取 ARM 模板 JSON 的 `parameters` 段：名称、类型、默认值、允许值。
//! 模板其余内容对编排器不透明。

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::{ExecutorError, Result};

/// 部署制品位置参数
pub const ARTIFACTS_LOCATION: &str = "_artifactsLocation";
/// 部署制品 SAS 令牌参数
pub const ARTIFACTS_SAS_TOKEN: &str = "_artifactsLocationSasToken";

/// 参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    SecureString,
    Int,
    Bool,
    Object,
    SecureObject,
    Array,
}

impl ParamType {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "string" => Some(Self::String),
            "securestring" => Some(Self::SecureString),
            "int" => Some(Self::Int),
            "bool" => Some(Self::Bool),
            "object" => Some(Self::Object),
            "secureobject" => Some(Self::SecureObject),
            "array" => Some(Self::Array),
            _ => None,
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Self::SecureString | Self::SecureObject)
    }

    /// 值是否符合类型
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String | Self::SecureString => value.is_string(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Bool => value.is_boolean(),
            Self::Object | Self::SecureObject => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    /// 把命令行字符串转换为该类型的值
    pub fn coerce(&self, raw: &str) -> Option<Value> {
        match self {
            Self::String | Self::SecureString => Some(Value::String(raw.to_string())),
            Self::Int => raw.parse::<i64>().ok().map(Value::from),
            Self::Bool => raw.parse::<bool>().ok().map(Value::Bool),
            Self::Object | Self::SecureObject => {
                serde_json::from_str(raw).ok().filter(|v: &Value| v.is_object())
            }
            Self::Array => serde_json::from_str(raw).ok().filter(|v: &Value| v.is_array()),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::SecureString => "securestring",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Object => "object",
            Self::SecureObject => "secureobject",
            Self::Array => "array",
        };
        f.write_str(name)
    }
}

/// 单个参数声明
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub default_value: Option<Value>,
    pub allowed_values: Option<Vec<Value>>,
}

impl ParamSpec {
    /// 没有默认值即为必填
    pub fn is_required(&self) -> bool {
        self.default_value.is_none()
    }

    /// 类型与允许值检查
    pub fn check(&self, value: &Value) -> Result<()> {
        if !self.param_type.accepts(value) {
            return Err(ExecutorError::Configuration(format!(
                "参数 {} 类型应为 {}",
                self.name, self.param_type
            )));
        }
        if let Some(allowed) = &self.allowed_values {
            if !allowed.contains(value) {
                let shown = if self.param_type.is_secure() {
                    "******".to_string()
                } else {
                    value.to_string()
                };
                return Err(ExecutorError::Configuration(format!(
                    "参数 {} 的值 {} 不在允许值 {:?} 中",
                    self.name, shown, allowed
                )));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RawTemplate {
    #[serde(default)]
    parameters: BTreeMap<String, RawParam>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawParam {
    #[serde(rename = "type")]
    param_type: String,
    #[serde(default)]
    default_value: Option<Value>,
    #[serde(default)]
    allowed_values: Option<Vec<Value>>,
}

/// 模板声明的参数模式
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateSchema {
    params: BTreeMap<String, ParamSpec>,
}

impl TemplateSchema {
    pub fn from_specs(specs: impl IntoIterator<Item = ParamSpec>) -> Self {
        Self {
            params: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    /// 从模板 JSON 文本解析
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawTemplate = serde_json::from_str(content)
            .map_err(|e| ExecutorError::Configuration(format!("模板 JSON 无效: {}", e)))?;

        let mut params = BTreeMap::new();
        for (name, param) in raw.parameters {
            let param_type = ParamType::parse(&param.param_type).ok_or_else(|| {
                ExecutorError::Configuration(format!(
                    "参数 {} 的类型未知: {}",
                    name, param.param_type
                ))
            })?;
            params.insert(
                name.clone(),
                ParamSpec {
                    name,
                    param_type,
                    default_value: param.default_value,
                    allowed_values: param.allowed_values,
                },
            );
        }
        Ok(Self { params })
    }

    /// 从模板文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExecutorError::Configuration(format!("无法读取模板 {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.get(name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.values()
    }

    pub fn required(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.values().filter(|p| p.is_required())
    }

    pub fn is_secure(&self, name: &str) -> bool {
        self.get(name).map(|p| p.param_type.is_secure()).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEMPLATE: &str = r#"{
        "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
        "contentVersion": "1.0.0.0",
        "parameters": {
            "location": { "type": "string" },
            "adminPassword": { "type": "secureString" },
            "nodeCount": { "type": "int", "defaultValue": 1, "allowedValues": [1, 3, 4, 5] },
            "installBloom": { "type": "string", "defaultValue": "No", "allowedValues": ["Yes", "No"] },
            "_artifactsLocation": { "type": "string", "defaultValue": "[deployment().properties.templateLink.uri]" }
        },
        "resources": []
    }"#;

    #[test]
    fn test_parse_schema() {
        let schema = TemplateSchema::from_json(TEMPLATE).unwrap();
        assert_eq!(schema.len(), 5);
        assert!(schema.declares(ARTIFACTS_LOCATION));
        assert!(!schema.declares(ARTIFACTS_SAS_TOKEN));
        assert_eq!(schema.get("adminPassword").unwrap().param_type, ParamType::SecureString);
        assert!(schema.is_secure("adminPassword"));

        let required: Vec<_> = schema.required().map(|p| p.name.as_str()).collect();
        assert_eq!(required, vec!["adminPassword", "location"]);
    }

    #[test]
    fn test_check_type_and_allowed_values() {
        let schema = TemplateSchema::from_json(TEMPLATE).unwrap();
        let node_count = schema.get("nodeCount").unwrap();
        assert!(node_count.check(&json!(3)).is_ok());
        assert!(node_count.check(&json!(2)).is_err());
        assert!(node_count.check(&json!("3")).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = TemplateSchema::from_json(r#"{"parameters": {"x": {"type": "float"}}}"#).unwrap_err();
        assert!(matches!(err, ExecutorError::Configuration(_)));
    }

    #[test]
    fn test_coerce() {
        assert_eq!(ParamType::Int.coerce("3"), Some(json!(3)));
        assert_eq!(ParamType::Int.coerce("three"), None);
        assert_eq!(ParamType::Bool.coerce("true"), Some(json!(true)));
        assert_eq!(ParamType::String.coerce("Yes"), Some(json!("Yes")));
        assert_eq!(ParamType::Array.coerce("[1,2]"), Some(json!([1, 2])));
        assert_eq!(ParamType::Object.coerce("[1,2]"), None);
    }
}
