use std::{fmt::Write, path::Path, str::FromStr};

use anyhow::{Context, bail};
use serde::Deserialize;
use serde_dynamic_string::DynamicString;
use toml::Value;

use crate::{Config, MAX_WINDOW_SECONDS, PolicyConfig};

pub(crate) fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    load_from_str(&content)
}

pub(crate) fn load_from_str(content: &str) -> anyhow::Result<Config> {
    let mut raw_config: Value = toml::from_str(content)?;
    expand_dynamic_strings(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;

    for warning in validate(&config)? {
        log::warn!("{warning}");
    }

    Ok(config)
}

fn expand_dynamic_strings<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match DynamicString::<String>::from_str(s) {
            Ok(out) => *s = out.into_inner(),
            Err(err) => {
                let mut p = String::new();

                for segment in path {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => write!(p, "[{i}]")?,
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                bail!("Failed to expand dynamic string at path '{p}': {err}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<Vec<String>> {
    let mut warnings = validate_health(config)?;
    warnings.extend(validate_rate_limits(config)?);

    Ok(warnings)
}

fn validate_health(config: &Config) -> anyhow::Result<Vec<String>> {
    let health = &config.server.health;
    let mut warnings = Vec::new();

    if !health.enabled {
        return Ok(warnings);
    }

    if !health.path.starts_with('/') {
        bail!("Health endpoint path '{}' must start with '/'", health.path);
    }

    if health.listen.is_some() && health.listen == config.server.listen_address {
        bail!("Health endpoint listen address must differ from the server listen address");
    }

    if config.server.rate_limits.routes.contains_key(health.path.as_ref()) {
        warnings.push(format!(
            "Rate limit route '{}' is the health endpoint, which is never rate limited",
            health.path
        ));
    }

    Ok(warnings)
}

/// Validates the rate limit configuration and returns warnings.
///
/// Policies with a zero window or a zero limit are errors, whether rate limiting is enabled or not.
pub(crate) fn validate_rate_limits(config: &Config) -> anyhow::Result<Vec<String>> {
    let rate_limits = &config.server.rate_limits;
    let mut warnings = Vec::new();

    if let Some(policy) = &rate_limits.default {
        validate_policy("the default policy", policy)?;
    }

    for (route, policy) in &rate_limits.routes {
        validate_policy(&format!("route '{route}'"), policy)?;

        if !route.starts_with('/') {
            warnings.push(format!(
                "Rate limit route '{route}' does not start with '/' and will never match a request path"
            ));
        }
    }

    let has_policies = rate_limits.default.is_some() || !rate_limits.routes.is_empty();

    if rate_limits.enabled && !has_policies {
        warnings.push(
            "Rate limiting is enabled but no policies are configured. Add [server.rate_limits.default] or [server.rate_limits.routes.\"/path\"]".to_string(),
        );
    }

    if !rate_limits.enabled && has_policies {
        warnings.push("Rate limit policies are configured but rate limiting is disabled".to_string());
    }

    if rate_limits.key_prefix.is_empty() {
        warnings.push("Rate limit key_prefix is empty, window keys will not be namespaced".to_string());
    }

    Ok(warnings)
}

fn validate_policy(name: &str, policy: &PolicyConfig) -> anyhow::Result<()> {
    if policy.window_seconds == 0 {
        bail!("Rate limit window_seconds for {name} must be at least 1");
    }

    if policy.window_seconds > MAX_WINDOW_SECONDS {
        bail!("Rate limit window_seconds for {name} must be at most {MAX_WINDOW_SECONDS}");
    }

    if policy.max_count == 0 {
        bail!("Rate limit max_count for {name} must be at least 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::{assert_debug_snapshot, assert_snapshot};

    use super::*;

    #[test]
    fn zero_window_names_the_route() {
        let config = indoc! {r#"
            [server.rate_limits]
            enabled = true

            [server.rate_limits.routes."/hello"]
            window_seconds = 0
            max_count = 5
        "#};

        let error = load_from_str(config).unwrap_err().to_string();
        assert_snapshot!(error, @"Rate limit window_seconds for route '/hello' must be at least 1");
    }

    #[test]
    fn zero_max_count_names_the_route() {
        let config = indoc! {r#"
            [server.rate_limits.routes."/hello"]
            max_count = 0
        "#};

        let error = load_from_str(config).unwrap_err().to_string();
        assert_snapshot!(error, @"Rate limit max_count for route '/hello' must be at least 1");
    }

    #[test]
    fn oversized_window_names_the_route() {
        let config = indoc! {r#"
            [server.rate_limits.routes."/hello"]
            window_seconds = 31536001
        "#};

        let error = load_from_str(config).unwrap_err().to_string();
        assert_snapshot!(error, @"Rate limit window_seconds for route '/hello' must be at most 31536000");
    }

    #[test]
    fn zero_default_policy_is_rejected() {
        let config = indoc! {r#"
            [server.rate_limits.default]
            window_seconds = 0
        "#};

        let error = load_from_str(config).unwrap_err().to_string();
        assert_snapshot!(error, @"Rate limit window_seconds for the default policy must be at least 1");
    }

    #[test]
    fn warnings_for_suspicious_settings() {
        let config = indoc! {r#"
            [server.rate_limits]
            enabled = false
            key_prefix = ""

            [server.rate_limits.routes."hello"]
            max_count = 3
        "#};

        let config: Config = toml::from_str(config).unwrap();
        let warnings = validate_rate_limits(&config).unwrap();

        assert_debug_snapshot!(warnings, @r#"
        [
            "Rate limit route 'hello' does not start with '/' and will never match a request path",
            "Rate limit policies are configured but rate limiting is disabled",
            "Rate limit key_prefix is empty, window keys will not be namespaced",
        ]
        "#);
    }

    #[test]
    fn enabled_without_policies_warns() {
        let config = indoc! {r#"
            [server.rate_limits]
            enabled = true
        "#};

        let config: Config = toml::from_str(config).unwrap();
        let warnings = validate_rate_limits(&config).unwrap();

        assert_debug_snapshot!(warnings, @r#"
        [
            "Rate limiting is enabled but no policies are configured. Add [server.rate_limits.default] or [server.rate_limits.routes.\"/path\"]",
        ]
        "#);
    }

    #[test]
    fn valid_configuration_has_no_warnings() {
        let config = indoc! {r#"
            [server.rate_limits]
            enabled = true

            [server.rate_limits.routes."/hello"]
            window_seconds = 60
            max_count = 5
        "#};

        let config = load_from_str(config).unwrap();

        assert!(validate_rate_limits(&config).unwrap().is_empty());
    }

    #[test]
    fn redis_url_from_environment() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("WINDOWGATE_TEST_REDIS_URL", "redis://10.1.2.3:6379/4") };

        let config = indoc! {r#"
            [server.rate_limits.storage]
            type = "redis"
            url = "{{ env.WINDOWGATE_TEST_REDIS_URL }}"
        "#};

        let config = load_from_str(config).unwrap();

        let crate::StorageConfig::Redis(redis) = &config.server.rate_limits.storage else {
            unreachable!("storage must be redis");
        };

        assert_eq!(redis.url, "redis://10.1.2.3:6379/4");
    }

    #[test]
    fn missing_environment_variable_names_the_path() {
        let config = indoc! {r#"
            [server.rate_limits.storage]
            type = "redis"
            url = "{{ env.WINDOWGATE_TEST_UNSET_VARIABLE }}"
        "#};

        let error = load_from_str(config).unwrap_err().to_string();
        assert!(
            error.starts_with("Failed to expand dynamic string at path 'server.rate_limits.storage.url'"),
            "{error}"
        );
    }

    #[test]
    fn health_path_must_be_absolute() {
        let config = indoc! {r#"
            [server.health]
            path = "health"
        "#};

        let error = load_from_str(config).unwrap_err().to_string();
        assert_snapshot!(error, @"Health endpoint path 'health' must start with '/'");
    }

    #[test]
    fn disabled_health_path_is_not_checked() {
        let config = indoc! {r#"
            [server.health]
            enabled = false
            path = "health"
        "#};

        assert!(load_from_str(config).is_ok());
    }

    #[test]
    fn health_listener_must_not_clash_with_server() {
        let config = indoc! {r#"
            [server]
            listen_address = "127.0.0.1:8000"

            [server.health]
            listen = "127.0.0.1:8000"
        "#};

        let error = load_from_str(config).unwrap_err().to_string();
        assert_snapshot!(error, @"Health endpoint listen address must differ from the server listen address");
    }

    #[test]
    fn rate_limited_health_route_warns() {
        let config = indoc! {r#"
            [server.rate_limits]
            enabled = true

            [server.rate_limits.routes."/health"]
            max_count = 1
        "#};

        let config: Config = toml::from_str(config).unwrap();

        assert_debug_snapshot!(validate(&config).unwrap(), @r#"
        [
            "Rate limit route '/health' is the health endpoint, which is never rate limited",
        ]
        "#);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("windowgate.toml");

        std::fs::write(
            &path,
            indoc! {r#"
                [server]
                listen_address = "127.0.0.1:4000"
            "#},
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.server.listen_address, Some("127.0.0.1:4000".parse().unwrap()));
    }

    #[test]
    fn load_missing_file_fails() {
        let error = load("/nonexistent/windowgate.toml").unwrap_err().to_string();
        assert_snapshot!(error, @"Failed to read configuration file /nonexistent/windowgate.toml");
    }
}
