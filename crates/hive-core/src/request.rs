// ABOUTME: SpawnRequest and the pieces it is built from.
// ABOUTME: Restart policy, application identity and plugin contributions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::SpawnError;

/// Who owns an application and what it is called.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppIdentity {
    pub user: String,
    pub name: String,
}

impl AppIdentity {
    pub fn new(user: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            name: name.into(),
        }
    }

    /// Both parts must be usable as a single path component.
    pub fn validate(&self) -> Result<(), SpawnError> {
        for (field, value) in [("user", &self.user), ("name", &self.name)] {
            if value.is_empty() {
                return Err(SpawnError::InvalidRequest(format!("`{field}` is required")));
            }
            if value == "." || value == ".." || value.contains('/') || value.contains('\0') {
                return Err(SpawnError::InvalidRequest(format!(
                    "`{field}` must be a plain name, got {value:?}"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user, self.name)
    }
}

/// How often a crashed drone is brought back.
///
/// One enum rather than a flag plus a count, so "unbounded" and "bounded"
/// can never both be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RestartPolicy {
    #[default]
    Unbounded,
    Bounded { max: u32 },
}

impl RestartPolicy {
    /// No bound means restart forever.
    pub fn from_max(max: Option<u32>) -> Self {
        match max {
            Some(max) => RestartPolicy::Bounded { max },
            None => RestartPolicy::Unbounded,
        }
    }

    pub fn max(&self) -> Option<u32> {
        match self {
            RestartPolicy::Unbounded => None,
            RestartPolicy::Bounded { max } => Some(*max),
        }
    }

    /// Whether another restart is allowed after `restarts` have already happened.
    pub fn allows(&self, restarts: u32) -> bool {
        match self {
            RestartPolicy::Unbounded => true,
            RestartPolicy::Bounded { max } => restarts < *max,
        }
    }
}

/// What one plugin contributes to a drone command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpawn {
    /// Option tokens placed between the launcher and the script
    #[serde(default)]
    pub argv: Vec<String>,
    /// Replaces the start script
    #[serde(default)]
    pub script: Option<PathBuf>,
    /// Replaces the script arguments
    #[serde(default)]
    pub script_args: Option<Vec<String>>,
}

/// Filesystem confinement applied by the drone bootstrap before the app loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Isolation {
    /// New filesystem root
    pub root: PathBuf,
    /// Working directory inside the new root
    pub app_path: PathBuf,
}

/// Everything needed to start one drone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub app: AppIdentity,
    /// Start script, resolved against the checkout
    pub start_script: PathBuf,
    #[serde(default)]
    pub script_args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub restart: RestartPolicy,
    /// Working directory of the drone (the app checkout)
    pub cwd: PathBuf,
    /// Keep `env` out of the logs
    #[serde(default)]
    pub hide_env: bool,
    /// Contributions keyed by plugin name, applied in key order
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginSpawn>,
    #[serde(default)]
    pub isolation: Option<Isolation>,
}

impl SpawnRequest {
    pub fn new(app: AppIdentity, start_script: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            app,
            start_script: start_script.into(),
            script_args: Vec::new(),
            env: BTreeMap::new(),
            restart: RestartPolicy::default(),
            cwd: cwd.into(),
            hide_env: false,
            plugins: BTreeMap::new(),
            isolation: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_hidden_env(mut self, hide_env: bool) -> Self {
        self.hide_env = hide_env;
        self
    }

    pub fn with_isolation(mut self, root: impl Into<PathBuf>, app_path: impl Into<PathBuf>) -> Self {
        self.isolation = Some(Isolation {
            root: root.into(),
            app_path: app_path.into(),
        });
        self
    }

    pub fn with_plugin(mut self, name: impl Into<String>, spawn: PluginSpawn) -> Self {
        self.plugins.insert(name.into(), spawn);
        self
    }

    /// Reject requests that could never describe a real checkout.
    pub fn validate(&self) -> Result<(), SpawnError> {
        self.app.validate()?;
        if self.start_script.as_os_str().is_empty() {
            return Err(SpawnError::InvalidRequest(
                "`start_script` is required".to_string(),
            ));
        }
        if let Some(isolation) = &self.isolation {
            if !isolation.root.is_absolute() || !isolation.app_path.is_absolute() {
                return Err(SpawnError::InvalidRequest(
                    "isolation paths must be absolute".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SpawnRequest {
        SpawnRequest::new(AppIdentity::new("marak", "hello"), "server.js", "/srv/hello")
    }

    #[test]
    fn test_restart_policy_from_max() {
        assert_eq!(RestartPolicy::from_max(None), RestartPolicy::Unbounded);
        assert_eq!(
            RestartPolicy::from_max(Some(3)),
            RestartPolicy::Bounded { max: 3 }
        );
        assert_eq!(RestartPolicy::from_max(Some(3)).max(), Some(3));
        assert_eq!(RestartPolicy::Unbounded.max(), None);
    }

    #[test]
    fn test_restart_policy_allows() {
        let bounded = RestartPolicy::Bounded { max: 2 };
        assert!(bounded.allows(0));
        assert!(bounded.allows(1));
        assert!(!bounded.allows(2));
        assert!(RestartPolicy::Unbounded.allows(u32::MAX));
        assert!(!RestartPolicy::Bounded { max: 0 }.allows(0));
    }

    #[test]
    fn test_restart_policy_serde() {
        let json = serde_json::to_string(&RestartPolicy::Bounded { max: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"bounded","max":3}"#);
        let parsed: RestartPolicy = serde_json::from_str(r#"{"type":"unbounded"}"#).unwrap();
        assert_eq!(parsed, RestartPolicy::Unbounded);
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_missing_user_is_invalid() {
        let mut req = request();
        req.app.user.clear();
        let err = req.validate().unwrap_err();
        assert!(matches!(err, SpawnError::InvalidRequest(_)));
        assert!(err.to_string().contains("user"));
    }

    #[test]
    fn test_path_like_name_is_invalid() {
        let mut req = request();
        req.app.name = "../etc".to_string();
        assert!(matches!(
            req.validate(),
            Err(SpawnError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_empty_start_script_is_invalid() {
        let mut req = request();
        req.start_script = PathBuf::new();
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("start_script"));
    }

    #[test]
    fn test_relative_isolation_is_invalid() {
        let req = request().with_isolation("jail", "/app");
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("absolute"));

        let req = request().with_isolation("/srv/jail", "/app");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let req = request()
            .with_args(["--verbose"])
            .with_env("NODE_ENV", "production")
            .with_restart(RestartPolicy::Bounded { max: 1 })
            .with_hidden_env(true)
            .with_plugin(
                "coffee",
                PluginSpawn {
                    argv: vec!["--coffee".to_string()],
                    ..PluginSpawn::default()
                },
            );

        assert_eq!(req.script_args, vec!["--verbose"]);
        assert_eq!(req.env.get("NODE_ENV").map(String::as_str), Some("production"));
        assert_eq!(req.restart.max(), Some(1));
        assert!(req.hide_env);
        assert_eq!(req.plugins["coffee"].argv, vec!["--coffee"]);
    }

    #[test]
    fn test_request_from_json_defaults() {
        let req: SpawnRequest = serde_json::from_str(
            r#"{"app":{"user":"u","name":"n"},"start_script":"app.js","cwd":"/srv/n"}"#,
        )
        .unwrap();
        assert_eq!(req.restart, RestartPolicy::Unbounded);
        assert!(req.plugins.is_empty());
        assert!(!req.hide_env);
    }
}
