//! Tunables for the orchestrator and the ARM backend.
//! Both read `ROLE_ORCH_*` environment variables and fall back to defaults on absent or
//! unparsable values.

use std::fmt::{Debug, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backend::DEFAULT_API_VERSION;
use crate::model::IdStrategy;
use crate::transport::{RetryPolicy, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub retry_attempts: u32,
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,
    #[serde(with = "duration_secs")]
    pub principal_poll_interval: Duration,
    /// Extra sleep after a principal first resolves.
    #[serde(with = "duration_secs")]
    pub principal_grace: Duration,
    #[serde(with = "duration_secs")]
    pub propagation_poll_interval: Duration,
    /// Extra sleep after an assignment first lists; enforcement trails the control plane.
    #[serde(with = "duration_secs")]
    pub propagation_grace: Duration,
    /// Widest scope to probe principal visibility at. `None` probes at the scope being granted.
    pub availability_scope: Option<String>,
    pub id_strategy: IdStrategy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            principal_poll_interval: Duration::from_secs(5),
            principal_grace: Duration::from_secs(10),
            propagation_poll_interval: Duration::from_secs(5),
            propagation_grace: Duration::from_secs(10),
            availability_scope: None,
            id_strategy: IdStrategy::Deterministic,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self { Self::from_lookup(|k| std::env::var(k).ok()) }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        let d = Self::default();
        Self {
            retry_attempts: parse_or(&get, "ROLE_ORCH_RETRY_ATTEMPTS", d.retry_attempts, |s| s.parse::<u32>().ok().filter(|n| *n > 0)),
            retry_delay: secs_or(&get, "ROLE_ORCH_RETRY_DELAY_SECS", d.retry_delay),
            principal_poll_interval: secs_or(&get, "ROLE_ORCH_PRINCIPAL_POLL_SECS", d.principal_poll_interval),
            principal_grace: secs_or(&get, "ROLE_ORCH_PRINCIPAL_GRACE_SECS", d.principal_grace),
            propagation_poll_interval: secs_or(&get, "ROLE_ORCH_PROPAGATION_POLL_SECS", d.propagation_poll_interval),
            propagation_grace: secs_or(&get, "ROLE_ORCH_PROPAGATION_GRACE_SECS", d.propagation_grace),
            availability_scope: get("ROLE_ORCH_AVAILABILITY_SCOPE").map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            id_strategy: parse_or(&get, "ROLE_ORCH_ID_STRATEGY", d.id_strategy, IdStrategy::parse),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { max_attempts: self.retry_attempts, delay: self.retry_delay, ..RetryPolicy::default() }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    pub endpoint: String,
    pub api_version: String,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    pub authority: String,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Pre-acquired bearer token; takes precedence over the client secret.
    pub token: Option<String>,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://management.azure.com".into(),
            api_version: DEFAULT_API_VERSION.into(),
            request_timeout: Duration::from_secs(30),
            authority: "https://login.microsoftonline.com".into(),
            tenant_id: None,
            client_id: None,
            client_secret: None,
            token: None,
        }
    }
}

impl ArmConfig {
    pub fn from_env() -> Self { Self::from_lookup(|k| std::env::var(k).ok()) }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        let d = Self::default();
        let non_empty = |k: &str| get(k).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            endpoint: non_empty("ROLE_ORCH_ARM_ENDPOINT").unwrap_or(d.endpoint),
            api_version: non_empty("ROLE_ORCH_ARM_API_VERSION").unwrap_or(d.api_version),
            request_timeout: secs_or(&get, "ROLE_ORCH_ARM_TIMEOUT_SECS", d.request_timeout),
            authority: non_empty("ROLE_ORCH_ARM_AUTHORITY").unwrap_or(d.authority),
            tenant_id: non_empty("AZURE_TENANT_ID"),
            client_id: non_empty("AZURE_CLIENT_ID"),
            client_secret: non_empty("AZURE_CLIENT_SECRET"),
            token: non_empty("ROLE_ORCH_ARM_TOKEN"),
        }
    }
}

impl Debug for ArmConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("ArmConfig")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("request_timeout", &self.request_timeout)
            .field("authority", &self.authority)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("token", &redact(&self.token))
            .finish()
    }
}

fn parse_or<T, G, P>(get: &G, key: &str, default: T, parse: P) -> T
where
    G: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    match get(key) {
        None => default,
        Some(raw) => parse(raw.trim()).unwrap_or_else(|| {
            warn!(target: "role_orchestrator::config", key, value = %raw, "ignoring unparsable setting");
            default
        }),
    }
}

fn secs_or<G: Fn(&str) -> Option<String>>(get: &G, key: &str, default: Duration) -> Duration {
    parse_or(get, key, default, |s| {
        s.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0).map(Duration::from_secs_f64)
    })
}

/// Durations as (fractional) seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> { s.serialize_f64(d.as_secs_f64()) }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(D::Error::custom(format!("invalid duration {secs}")));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_observed_propagation_windows() {
        let c = OrchestratorConfig::default();
        assert_eq!(c.retry_attempts, 15);
        assert_eq!(c.retry_delay, Duration::from_secs(5));
        assert_eq!(c.retry_policy().budget(), Duration::from_secs(70));
        assert_eq!(c.principal_grace, Duration::from_secs(10));
        assert_eq!(c.propagation_grace, Duration::from_secs(10));
        assert_eq!(c.id_strategy, IdStrategy::Deterministic);
    }

    #[test]
    fn env_overrides_and_bad_values_fall_back() {
        let c = OrchestratorConfig::from_lookup(lookup(&[
            ("ROLE_ORCH_RETRY_ATTEMPTS", "3"),
            ("ROLE_ORCH_RETRY_DELAY_SECS", "0.5"),
            ("ROLE_ORCH_PRINCIPAL_POLL_SECS", "-1"),
            ("ROLE_ORCH_PROPAGATION_GRACE_SECS", "soon"),
            ("ROLE_ORCH_AVAILABILITY_SCOPE", " /subscriptions/s1 "),
            ("ROLE_ORCH_ID_STRATEGY", "random"),
        ]));
        assert_eq!(c.retry_attempts, 3);
        assert_eq!(c.retry_delay, Duration::from_millis(500));
        assert_eq!(c.principal_poll_interval, Duration::from_secs(5));
        assert_eq!(c.propagation_grace, Duration::from_secs(10));
        assert_eq!(c.availability_scope.as_deref(), Some("/subscriptions/s1"));
        assert_eq!(c.id_strategy, IdStrategy::Random);

        let zero = OrchestratorConfig::from_lookup(lookup(&[("ROLE_ORCH_RETRY_ATTEMPTS", "0")]));
        assert_eq!(zero.retry_attempts, 15);
    }

    #[test]
    fn json_round_trip_uses_seconds() {
        let v = serde_json::to_value(OrchestratorConfig::default()).unwrap();
        assert_eq!(v["retry_delay"], serde_json::json!(5.0));
        let parsed: OrchestratorConfig = serde_json::from_value(serde_json::json!({"retry_attempts": 4, "principal_grace": 1.5})).unwrap();
        assert_eq!(parsed.retry_attempts, 4);
        assert_eq!(parsed.principal_grace, Duration::from_millis(1500));
        assert_eq!(parsed.retry_delay, Duration::from_secs(5));
        assert!(serde_json::from_value::<OrchestratorConfig>(serde_json::json!({"retry_delay": -2.0})).is_err());
    }

    #[test]
    fn arm_config_from_env_and_redaction() {
        let c = ArmConfig::from_lookup(lookup(&[
            ("ROLE_ORCH_ARM_ENDPOINT", "http://127.0.0.1:9"),
            ("AZURE_TENANT_ID", "t1"),
            ("AZURE_CLIENT_ID", "c1"),
            ("AZURE_CLIENT_SECRET", "hunter2"),
        ]));
        assert_eq!(c.endpoint, "http://127.0.0.1:9");
        assert_eq!(c.api_version, DEFAULT_API_VERSION);
        assert_eq!(c.client_secret.as_deref(), Some("hunter2"));
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hunter2"), "{dbg}");
        assert!(dbg.contains("<redacted>"));
    }
}
