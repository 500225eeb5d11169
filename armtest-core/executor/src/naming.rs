//! 部署 ID、资源组名、部署名与资源组标签

use armtest_common::{CleanupPolicy, MANAGED_BY_TAG, MANAGED_BY_VALUE};
use armtest_provider::Tags;
use chrono::{DateTime, Duration, Utc};

const RESOURCE_GROUP_MAX: usize = 90;
const DEPLOYMENT_NAME_MAX: usize = 64;
const ID_TOKEN_LEN: usize = 6;

/// 一次部署使用的全部名称
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentNames {
    pub deployment_id: String,
    pub resource_group: String,
    pub deployment_name: String,
    pub created_at: DateTime<Utc>,
}

impl DeploymentNames {
    pub fn new(prefix: &str, scenario: &str, token: &str, now: DateTime<Utc>) -> Self {
        let ts = now.format("%Y%m%d-%H%M%S").to_string();
        let short: String = token.chars().take(ID_TOKEN_LEN).collect();
        let sanitized = sanitize(scenario);
        let suffix = format!("{}-{}", ts, short);

        Self {
            deployment_id: format!("{}-{}", sanitized, suffix),
            resource_group: fit(prefix, &sanitized, &suffix, RESOURCE_GROUP_MAX),
            deployment_name: fit("neo4j-deploy", &sanitized, &suffix, DEPLOYMENT_NAME_MAX),
            created_at: now,
        }
    }

    /// 资源组标签
    pub fn tags(
        &self,
        scenario: &str,
        owner: &str,
        policy: CleanupPolicy,
        schedule_hours: Option<u32>,
    ) -> Tags {
        let mut tags = Tags::new();
        tags.insert("purpose".into(), "testing".into());
        tags.insert("scenario".into(), scenario.to_string());
        tags.insert("branch".into(), current_branch());
        tags.insert("created".into(), self.created_at.to_rfc3339());
        tags.insert("owner".into(), owner.to_string());
        tags.insert("deployment-id".into(), self.deployment_id.clone());
        tags.insert(MANAGED_BY_TAG.into(), MANAGED_BY_VALUE.into());
        tags.insert("cleanup-mode".into(), policy.as_tag().to_string());
        if let Some(hours) = schedule_hours {
            let expires = self.created_at + Duration::hours(i64::from(hours));
            tags.insert("expires".into(), expires.to_rfc3339());
        }
        tags
    }
}

/// 只保留 `[a-z0-9-]`，其余字符转为 `-`
pub fn sanitize(name: &str) -> String {
    let mapped: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .collect();
    let mut out = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('-').to_string()
}

/// `{head}-{body}-{suffix}`，超长时只截短 body，后缀始终保留
fn fit(head: &str, body: &str, suffix: &str, max: usize) -> String {
    let fixed = head.len() + suffix.len() + 2;
    let room = max.saturating_sub(fixed);
    let body = body[..body.len().min(room)].trim_end_matches('-');
    if body.is_empty() {
        format!("{}-{}", head, suffix)
    } else {
        format!("{}-{}-{}", head, body, suffix)
    }
}

/// CI 分支名，本地运行为 `local`
fn current_branch() -> String {
    ["GITHUB_REF_NAME", "GIT_BRANCH"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "local".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 30, 5).unwrap()
    }

    #[test]
    fn test_names() {
        let names = DeploymentNames::new("neo4j-test", "standalone-v5", "a1b2c3d4e5f6", now());
        assert_eq!(names.deployment_id, "standalone-v5-20250115-093005-a1b2c3");
        assert_eq!(names.resource_group, "neo4j-test-standalone-v5-20250115-093005-a1b2c3");
        assert_eq!(names.deployment_name, "neo4j-deploy-standalone-v5-20250115-093005-a1b2c3");
    }

    #[test]
    fn test_same_second_runs_do_not_collide() {
        let first = DeploymentNames::new("neo4j-test", "standalone-v5", "aaaaaa11", now());
        let second = DeploymentNames::new("neo4j-test", "standalone-v5", "bbbbbb22", now());
        assert_ne!(first.deployment_id, second.deployment_id);
        assert_ne!(first.resource_group, second.resource_group);
        assert_ne!(first.deployment_name, second.deployment_name);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Cluster_V5 (eu)"), "cluster-v5-eu");
        assert_eq!(sanitize("--x--"), "x");
    }

    #[test]
    fn test_truncation_keeps_suffix() {
        let long = "cluster-".repeat(12);
        let names = DeploymentNames::new("neo4j-test", &long, "abcdef99", now());
        assert!(names.resource_group.len() <= 90);
        assert!(names.deployment_name.len() <= 64);
        assert!(names.resource_group.starts_with("neo4j-test-cluster-"));
        assert!(names.resource_group.ends_with("-20250115-093005-abcdef"));
        assert!(names.deployment_name.ends_with("-20250115-093005-abcdef"));
        assert!(!names.deployment_name.contains("--"));

        let next_day = DeploymentNames::new("neo4j-test", &long, "abcdef99", now() + Duration::days(1));
        assert_ne!(names.resource_group, next_day.resource_group);
    }

    #[test]
    fn test_tags() {
        let names = DeploymentNames::new("neo4j-test", "cluster-v5", "abcdef", now());
        let tags = names.tags("cluster-v5", "qa@example.com", CleanupPolicy::OnSuccess, Some(4));
        assert_eq!(tags["purpose"], "testing");
        assert_eq!(tags[MANAGED_BY_TAG], MANAGED_BY_VALUE);
        assert_eq!(tags["cleanup-mode"], "on-success");
        assert_eq!(tags["deployment-id"], names.deployment_id);
        assert_eq!(tags["expires"], "2025-01-15T13:30:05+00:00");

        let tags = names.tags("cluster-v5", "qa", CleanupPolicy::Manual, None);
        assert!(!tags.contains_key("expires"));
    }
}
