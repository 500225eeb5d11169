//! Neo4j HTTP 事务端点探针
//!
//! 通过 `POST {base}/db/{database}/tx/commit` 执行 Cypher，
//! 探针数据为带 `key`/`value` 属性的 `ValidationTest` 节点。

use armtest_common::ConnectionDescriptor;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::probe::{ProbeCredentials, ProbeFactory, ServiceProbe};
use crate::{Result, ValidatorError};

const WRITE_STATEMENT: &str =
    "CREATE (n:ValidationTest {key: $key, value: $value, created_at: timestamp()})";
const READ_STATEMENT: &str = "MATCH (n:ValidationTest {key: $key}) RETURN n.value AS value";
const DELETE_STATEMENT: &str = "MATCH (n:ValidationTest {key: $key}) DELETE n";

/// Neo4j 探针配置
#[derive(Debug, Clone)]
pub struct Neo4jProbeConfig {
    /// 数据库名
    pub database: String,

    /// 单次 HTTP 请求超时
    pub request_timeout: Duration,

    /// 是否校验 TLS 证书
    pub verify_tls: bool,
}

impl Default for Neo4jProbeConfig {
    fn default() -> Self {
        Self {
            database: "neo4j".to_string(),
            request_timeout: Duration::from_secs(10),
            verify_tls: false,
        }
    }
}

/// Neo4j HTTP 探针
pub struct Neo4jHttpProbe {
    base_url: String,
    database: String,
    credentials: ProbeCredentials,
    http_client: Client,
}

impl Neo4jHttpProbe {
    pub fn new(
        descriptor: &ConnectionDescriptor,
        credentials: ProbeCredentials,
        config: &Neo4jProbeConfig,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            base_url: descriptor.http_base(),
            database: config.database.clone(),
            credentials,
            http_client,
        })
    }

    pub fn commit_url(&self) -> String {
        format!("{}/db/{}/tx/commit", self.base_url, self.database)
    }

    async fn commit(&self, statement: &str, parameters: Value) -> Result<Value> {
        let url = self.commit_url();
        debug!("执行 Cypher: {} -> {}", statement, url);

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(&statement_body(statement, parameters))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ValidatorError::Connection(e.to_string())
                } else {
                    ValidatorError::Http(e)
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ValidatorError::Authentication(format!(
                "{} 被拒绝 ({})",
                self.credentials.username, status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ValidatorError::Protocol(format!("HTTP {}: {}", status, body)));
        }

        let body: Value = response.json().await?;
        parse_commit_response(body)
    }
}

/// 事务端点请求体
pub fn statement_body(statement: &str, parameters: Value) -> Value {
    json!({
        "statements": [
            { "statement": statement, "parameters": parameters }
        ]
    })
}

/// 检查 `errors` 字段，返回第一个语句的结果
pub fn parse_commit_response(body: Value) -> Result<Value> {
    if let Some(error) = body
        .get("errors")
        .and_then(|e| e.as_array())
        .and_then(|errors| errors.first())
    {
        let code = error.get("code").and_then(|c| c.as_str()).unwrap_or("unknown");
        let message = error.get("message").and_then(|m| m.as_str()).unwrap_or("");
        return Err(ValidatorError::Protocol(format!("{}: {}", code, message)));
    }

    Ok(body
        .get("results")
        .and_then(|r| r.as_array())
        .and_then(|results| results.first())
        .cloned()
        .unwrap_or(Value::Null))
}

/// 从单语句结果中取第一行第一列
pub fn first_value(result: &Value) -> Option<String> {
    let cell = result.pointer("/data/0/row/0")?;
    match cell {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ServiceProbe for Neo4jHttpProbe {
    fn name(&self) -> &str {
        "neo4j-http"
    }

    async fn connect(&self) -> Result<()> {
        let result = self.commit("RETURN 1 AS ok", json!({})).await?;
        match first_value(&result).as_deref() {
            Some("1") => {
                info!("已连接 Neo4j: {}", self.base_url);
                Ok(())
            }
            other => Err(ValidatorError::Protocol(format!("RETURN 1 返回 {:?}", other))),
        }
    }

    async fn write_probe(&self, key: &str, value: &str) -> Result<()> {
        self.commit(WRITE_STATEMENT, json!({ "key": key, "value": value }))
            .await
            .map(|_| ())
    }

    async fn read_probe(&self, key: &str) -> Result<Option<String>> {
        let result = self.commit(READ_STATEMENT, json!({ "key": key })).await?;
        Ok(first_value(&result))
    }

    async fn delete_probe(&self, key: &str) -> Result<()> {
        self.commit(DELETE_STATEMENT, json!({ "key": key })).await.map(|_| ())
    }
}

/// Neo4j 探针工厂
#[derive(Debug, Clone, Default)]
pub struct Neo4jProbeFactory {
    config: Neo4jProbeConfig,
}

impl Neo4jProbeFactory {
    pub fn new(config: Neo4jProbeConfig) -> Self {
        Self { config }
    }
}

impl ProbeFactory for Neo4jProbeFactory {
    fn create(
        &self,
        descriptor: &ConnectionDescriptor,
        credentials: ProbeCredentials,
    ) -> Result<Box<dyn ServiceProbe>> {
        Ok(Box::new(Neo4jHttpProbe::new(descriptor, credentials, &self.config)?))
    }
}
