//! Configuration surface the engine consumes (spec.md §6).
//!
//! Nothing here reads a file or an environment variable — "Environment:
//! none prescribed; all configuration is injected." Callers build these
//! values however they like (a TOML file, a DI container, literals in a
//! test) and hand them to [`crate::database::Database::new`] /
//! [`crate::shard_set::ShardSet::new`].

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::resilience::ResiliencePolicy;

/// How a connection authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credentials {
    /// Username/password embedded in the connection string at resolution
    /// time.
    UserPassword { user: String, password: String },
    /// The platform's integrated/OS-level authentication; no secret is
    /// carried here.
    Integrated,
}

#[derive(Clone)]
struct EndpointState {
    version: u64,
    template: String,
    credentials: Credentials,
}

/// One read or write side of a [`crate::database::Database`].
///
/// A finalized connection string is derived deterministically from the
/// template and credentials, but only computed lazily and cached — see
/// spec.md §9's note on replacing the source's reactive property-change
/// notification with a monotonic version counter. Any setter bumps the
/// version; [`Endpoint::connection_string`] recomputes only when the
/// cached version is stale.
pub struct Endpoint {
    state: ArcSwap<EndpointState>,
    resolved: ArcSwap<Option<(u64, Arc<str>)>>,
    /// Key into a resilience policy registry shared across endpoints.
    pub resilience_key: String,
    /// Human-readable label, surfaced in logs and errors.
    pub description: String,
}

impl Endpoint {
    pub fn new(
        template: impl Into<String>,
        credentials: Credentials,
        resilience_key: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            state: ArcSwap::from_pointee(EndpointState {
                version: 0,
                template: template.into(),
                credentials,
            }),
            resolved: ArcSwap::from_pointee(None),
            resilience_key: resilience_key.into(),
            description: description.into(),
        }
    }

    /// Replace the connection-string template. Bumps the version so the
    /// next call to `connection_string` recomputes.
    pub fn set_connection_string_template(&self, template: impl Into<String>) {
        let current = self.state.load();
        self.state.store(Arc::new(EndpointState {
            version: current.version + 1,
            template: template.into(),
            credentials: current.credentials.clone(),
        }));
    }

    /// Replace the credentials. Bumps the version.
    pub fn set_credentials(&self, credentials: Credentials) {
        let current = self.state.load();
        self.state.store(Arc::new(EndpointState {
            version: current.version + 1,
            template: current.template.clone(),
            credentials,
        }));
    }

    /// The finalized connection string, resolved once per version and
    /// cached until a setter bumps the version again.
    pub fn connection_string(&self) -> Arc<str> {
        let state = self.state.load();

        if let Some((version, cached)) = &**self.resolved.load() {
            if *version == state.version {
                return cached.clone();
            }
        }

        let resolved: Arc<str> = Self::derive_connection_string(&state).into();
        self.resolved
            .store(Arc::new(Some((state.version, resolved.clone()))));
        resolved
    }

    fn derive_connection_string(state: &EndpointState) -> String {
        match &state.credentials {
            Credentials::UserPassword { user, password } => {
                format!("{};user={};password={}", state.template, user, password)
            }
            Credentials::Integrated => format!("{};integrated=true", state.template),
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("description", &self.description)
            .field("resilience_key", &self.resilience_key)
            .field("version", &self.state.load().version)
            .finish()
    }
}

/// Maps resilience keys to policies, shared across every endpoint that
/// references one by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceRegistry {
    policies: HashMap<String, ResiliencePolicy>,
}

impl ResilienceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, policy: ResiliencePolicy) -> Self {
        self.policies.insert(key.into(), policy);
        self
    }

    /// Resolve a key, falling back to the default policy if unregistered.
    pub fn resolve(&self, key: &str) -> ResiliencePolicy {
        self.policies.get(key).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_connection_string_is_deterministic() {
        let endpoint = Endpoint::new(
            "host=db0",
            Credentials::UserPassword {
                user: "svc".into(),
                password: "secret".into(),
            },
            "default",
            "shard 0 primary",
        );

        let first = endpoint.connection_string();
        let second = endpoint.connection_string();
        assert_eq!(first, second);
        assert_eq!(&*first, "host=db0;user=svc;password=secret");
    }

    #[test]
    fn test_setter_invalidates_cache() {
        let endpoint = Endpoint::new(
            "host=db0",
            Credentials::Integrated,
            "default",
            "shard 0 primary",
        );
        let before = endpoint.connection_string();
        endpoint.set_connection_string_template("host=db1");
        let after = endpoint.connection_string();

        assert_ne!(before, after);
        assert_eq!(&*after, "host=db1;integrated=true");
    }

    #[test]
    fn test_resilience_registry_falls_back_to_default() {
        let registry = ResilienceRegistry::new().with(
            "fast",
            ResiliencePolicy {
                retry_count: 5,
                ..Default::default()
            },
        );

        assert_eq!(registry.resolve("fast").retry_count, 5);
        assert_eq!(registry.resolve("missing"), ResiliencePolicy::default());
    }

    #[test]
    fn test_resilience_policy_from_toml_literal() {
        let toml_src = r#"
            retry_count = 3
            lengthening = "HalfSquare"
            breaker_failure_count = 2

            [retry_interval]
            secs = 0
            nanos = 500000000

            [breaker_test_interval]
            secs = 10
            nanos = 0
        "#;

        let policy: ResiliencePolicy = toml::from_str(toml_src).unwrap();
        assert_eq!(policy.retry_count, 3);
        assert_eq!(policy.lengthening, Lengthening::HalfSquare);
        assert_eq!(policy.breaker_failure_count, 2);
        assert_eq!(policy.retry_interval, std::time::Duration::from_millis(500));
        assert_eq!(policy.breaker_test_interval, std::time::Duration::from_secs(10));
    }

    #[test]
    fn test_resilience_policy_from_toml_literal_fills_in_defaults() {
        // `#[serde(default)]` on the struct means a partial TOML document
        // only overrides the fields it names.
        let policy: ResiliencePolicy = toml::from_str("retry_count = 7").unwrap();
        assert_eq!(policy.retry_count, 7);
        assert_eq!(policy.lengthening, Lengthening::Fibonacci);
        assert_eq!(policy.breaker_failure_count, 5);
    }

    #[test]
    fn test_registry_from_toml_literal() {
        let toml_src = r#"
            [policies.fast]
            retry_count = 1

            [policies.slow]
            retry_count = 9
        "#;

        let registry: ResilienceRegistry = toml::from_str(toml_src).unwrap();
        assert_eq!(registry.resolve("fast").retry_count, 1);
        assert_eq!(registry.resolve("slow").retry_count, 9);
        assert_eq!(registry.resolve("missing"), ResiliencePolicy::default());
    }

    #[test]
    fn test_credentials_from_toml_literal() {
        let user_pass: Credentials = toml::from_str(
            r#"
            [UserPassword]
            user = "svc"
            password = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(
            user_pass,
            Credentials::UserPassword {
                user: "svc".into(),
                password: "secret".into(),
            }
        );

        let integrated: Credentials = toml::from_str(r#""Integrated""#).unwrap();
        assert_eq!(integrated, Credentials::Integrated);
    }
}
