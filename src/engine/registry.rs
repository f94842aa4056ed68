//! Server Registry
//!
//! Immutable set of named server profiles, validated once at load time.
//! Concurrent readers share it through an `Arc` without locking.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{Engine, ServerProfile, ServerSummary, SshAuth, TunnelSpec};

const DEFAULT_SSH_PORT: u16 = 22;
const SECRET_ENV_PREFIX: &str = "env:";

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Server definition as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub engine: String,
    pub host: String,
    pub port: u16,
    pub schema: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub ssh_tunnel: Option<TunnelEntry>,
}

/// `ssh_tunnel` block of a server definition
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelEntry {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub private_key_passphrase: Option<String>,
}

/// Registry of all configured servers
#[derive(Debug, Default)]
pub struct ServerRegistry {
    profiles: Vec<Arc<ServerProfile>>,
    by_name: HashMap<String, usize>,
}

impl ServerRegistry {
    /// Validates every entry and builds the registry
    ///
    /// Any invalid entry fails the whole load; nothing is registered.
    pub fn load<I>(entries: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = ServerEntry>,
    {
        let mut registry = Self::default();

        for entry in entries {
            let profile = Self::build_profile(entry)?;
            if registry.by_name.contains_key(&profile.name) {
                return Err(EngineError::config(format!(
                    "Duplicate server name '{}'",
                    profile.name
                )));
            }
            registry
                .by_name
                .insert(profile.name.clone(), registry.profiles.len());
            registry.profiles.push(Arc::new(profile));
        }

        tracing::debug!(servers = registry.profiles.len(), "Server registry loaded");
        Ok(registry)
    }

    /// Parses a JSON array of server definitions
    pub fn from_json(raw: &str) -> EngineResult<Self> {
        let entries: Vec<ServerEntry> = serde_json::from_str(raw)
            .map_err(|e| EngineError::config(format!("Invalid server list: {e}")))?;
        Self::load(entries)
    }

    /// Gets a profile by its name
    pub fn resolve(&self, name: &str) -> EngineResult<Arc<ServerProfile>> {
        self.by_name
            .get(name)
            .map(|&idx| Arc::clone(&self.profiles[idx]))
            .ok_or_else(|| EngineError::server_not_found(name))
    }

    /// Lists all servers in configuration order, without credentials
    pub fn list(&self) -> Vec<ServerSummary> {
        self.profiles.iter().map(|p| p.summary()).collect()
    }

    /// Returns the number of registered servers
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Returns true if no servers are registered
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    fn build_profile(entry: ServerEntry) -> EngineResult<ServerProfile> {
        let name = entry.name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::config("Server name must not be empty"));
        }
        let context = |msg: String| EngineError::config(format!("Server '{name}': {msg}"));

        let engine: Engine = entry.engine.parse().map_err(|_| {
            context(format!(
                "unsupported engine '{}' (expected mysql or postgres)",
                entry.engine
            ))
        })?;

        if entry.host.trim().is_empty() {
            return Err(context("host must not be empty".into()));
        }
        if entry.port == 0 {
            return Err(context("port must not be 0".into()));
        }

        let password = resolve_secret(&entry.password).map_err(context)?;
        let ssh_tunnel = entry
            .ssh_tunnel
            .map(build_tunnel)
            .transpose()
            .map_err(context)?;

        Ok(ServerProfile {
            name: name.clone(),
            description: entry.description,
            engine,
            host: entry.host,
            port: entry.port,
            schema: entry.schema,
            user: entry.user,
            password,
            read_only: entry.read_only,
            ssh_tunnel,
        })
    }
}

fn build_tunnel(entry: TunnelEntry) -> Result<TunnelSpec, String> {
    if entry.host.trim().is_empty() {
        return Err("ssh_tunnel.host must not be empty".into());
    }
    if entry.port == 0 {
        return Err("ssh_tunnel.port must not be 0".into());
    }

    let auth = match (entry.password, entry.private_key_path) {
        (Some(_), Some(_)) => {
            return Err(
                "ssh_tunnel must set exactly one of password or private_key_path, not both".into(),
            )
        }
        (None, None) => {
            return Err("ssh_tunnel must set either password or private_key_path".into())
        }
        (Some(password), None) => {
            if entry.private_key_passphrase.is_some() {
                return Err("ssh_tunnel.private_key_passphrase requires private_key_path".into());
            }
            SshAuth::Password {
                password: resolve_secret(&password)?,
            }
        }
        (None, Some(path)) => SshAuth::Key {
            private_key_path: expand_home(&path),
            passphrase: entry
                .private_key_passphrase
                .as_deref()
                .map(resolve_secret)
                .transpose()?,
        },
    };

    Ok(TunnelSpec {
        host: entry.host,
        port: entry.port,
        user: entry.user,
        auth,
    })
}

/// Resolves `env:NAME` references; any other value is taken literally
fn resolve_secret(raw: &str) -> Result<String, String> {
    match raw.strip_prefix(SECRET_ENV_PREFIX) {
        Some(var) => std::env::var(var)
            .map_err(|_| format!("environment variable '{var}' referenced by a secret is not set")),
        None => Ok(raw.to_string()),
    }
}

fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => {
                let mut expanded = std::path::PathBuf::from(home);
                expanded.push(rest);
                expanded.to_string_lossy().into_owned()
            }
            None => path.to_string(),
        },
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, engine: &str) -> ServerEntry {
        ServerEntry {
            name: name.into(),
            description: format!("{name} server"),
            engine: engine.into(),
            host: "localhost".into(),
            port: 3306,
            schema: "test_db".into(),
            user: "root".into(),
            password: "secret".into(),
            read_only: false,
            ssh_tunnel: None,
        }
    }

    fn tunnel(password: Option<&str>, key: Option<&str>) -> TunnelEntry {
        TunnelEntry {
            host: "ssh.example.com".into(),
            port: 22,
            user: "ssh_user".into(),
            password: password.map(String::from),
            private_key_path: key.map(String::from),
            private_key_passphrase: None,
        }
    }

    #[test]
    fn loads_and_resolves_profiles_in_order() {
        let registry =
            ServerRegistry::load(vec![entry("dev-mysql", "mysql"), entry("dev-pg", "postgres")])
                .expect("should load");

        assert_eq!(registry.len(), 2);
        let profile = registry.resolve("dev-pg").expect("should resolve");
        assert_eq!(profile.engine, Engine::Postgres);

        let names: Vec<_> = registry.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["dev-mysql", "dev-pg"]);
    }

    #[test]
    fn duplicate_names_fail_the_whole_load() {
        let err = ServerRegistry::load(vec![
            entry("dup", "mysql"),
            entry("other", "mysql"),
            entry("dup", "postgres"),
        ])
        .expect_err("duplicates must be rejected");

        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn unknown_engine_is_a_config_error() {
        let err = ServerRegistry::load(vec![entry("x", "sqlite")]).expect_err("sqlite unsupported");
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("sqlite"));
    }

    #[test]
    fn tunnel_with_both_auth_methods_is_rejected() {
        let mut e = entry("t", "postgres");
        e.ssh_tunnel = Some(tunnel(Some("pw"), Some("/keys/id_rsa")));

        let err = ServerRegistry::load(vec![e]).expect_err("ambiguous auth");
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn tunnel_without_auth_method_is_rejected() {
        let mut e = entry("t", "postgres");
        e.ssh_tunnel = Some(tunnel(None, None));

        let err = ServerRegistry::load(vec![e]).expect_err("missing auth");
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn key_tunnel_keeps_passphrase() {
        let mut e = entry("t", "mysql");
        let mut t = tunnel(None, Some("/keys/id_ed25519"));
        t.private_key_passphrase = Some("phrase".into());
        e.ssh_tunnel = Some(t);

        let registry = ServerRegistry::load(vec![e]).expect("should load");
        let profile = registry.resolve("t").unwrap();
        let spec = profile.ssh_tunnel.as_ref().expect("tunnel");
        assert_eq!(
            spec.auth,
            SshAuth::Key {
                private_key_path: "/keys/id_ed25519".into(),
                passphrase: Some("phrase".into()),
            }
        );
        assert!(profile.summary().tunneled);
    }

    #[test]
    fn resolve_unknown_server_is_not_found() {
        let registry = ServerRegistry::load(vec![entry("a", "mysql")]).unwrap();
        let err = registry.resolve("b").expect_err("b is not registered");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn env_secret_references_are_resolved() {
        std::env::set_var("SQL_AGENT_TEST_REGISTRY_PW", "from-env");
        let mut e = entry("envpw", "mysql");
        e.password = "env:SQL_AGENT_TEST_REGISTRY_PW".into();

        let registry = ServerRegistry::load(vec![e]).unwrap();
        assert_eq!(registry.resolve("envpw").unwrap().password, "from-env");

        let mut missing = entry("missing", "mysql");
        missing.password = "env:SQL_AGENT_TEST_REGISTRY_UNSET".into();
        let err = ServerRegistry::load(vec![missing]).expect_err("unset variable");
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn parses_json_with_default_ssh_port() {
        let raw = r#"[
            {
                "name": "remote",
                "engine": "postgres",
                "host": "db.internal",
                "port": 5432,
                "schema": "app",
                "user": "app",
                "password": "pw",
                "ssh_tunnel": { "host": "bastion", "user": "ops", "password": "sshpw" }
            }
        ]"#;

        let registry = ServerRegistry::from_json(raw).expect("should parse");
        let profile = registry.resolve("remote").unwrap();
        assert_eq!(profile.ssh_tunnel.as_ref().unwrap().port, 22);
        assert_eq!(profile.description, "");
    }
}
