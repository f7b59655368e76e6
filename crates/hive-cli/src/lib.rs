// ABOUTME: Orchestrator commands behind the hive CLI.
// ABOUTME: Loads config, runs the report socket and drives drones through hive-spawn.

use anyhow::{Context, Result};
use hive_core::{AppIdentity, Config, RestartPolicy, SpawnError, SpawnRequest};
use hive_spawn::{DroneError, DroneInfo, DroneSpawner, Drones, PortReportHub};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Options for `hive spawn`.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub config_path: Option<PathBuf>,
    pub app: String,
    pub user: String,
    pub script: PathBuf,
    pub cwd: Option<PathBuf>,
    pub max_restarts: Option<u32>,
    pub env: Vec<String>,
    pub hide_env: bool,
    pub root: Option<PathBuf>,
    pub app_path: Option<PathBuf>,
    pub args: Vec<String>,
}

/// Load the config at `path` (or the default path). A missing default
/// config falls back to built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => {
            let path = Config::default_path();
            if path.exists() {
                Config::load(&path)
            } else {
                tracing::info!(path = %path.display(), "No config file, using defaults");
                Ok(Config::default())
            }
        }
    }
}

pub fn run_init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(Config::default_path);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Translate CLI options into a spawn request.
pub fn spawn_request(options: &SpawnOptions, config: &Config) -> Result<SpawnRequest> {
    let cwd = match &options.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let restart = match options.max_restarts {
        Some(max) => RestartPolicy::Bounded { max },
        None => config.restart_policy(),
    };

    let mut request = SpawnRequest::new(
        AppIdentity::new(&options.user, &options.app),
        &options.script,
        cwd,
    )
    .with_args(options.args.iter().cloned())
    .with_restart(restart)
    .with_hidden_env(options.hide_env);

    for pair in &options.env {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Invalid --env {pair:?}, expected KEY=VALUE"))?;
        request = request.with_env(key, value);
    }

    if let (Some(root), Some(app_path)) = (&options.root, &options.app_path) {
        request = request.with_isolation(root, app_path);
    }

    Ok(request)
}

/// JSON printed for a successful spawn.
pub fn success_json(info: &DroneInfo) -> Value {
    json!({
        "success": true,
        "app": info.app.to_string(),
        "spawn_id": info.spawn_id.to_string(),
        "pid": info.pid,
        "socket": {
            "host": info.socket.host,
            "port": info.socket.port,
        },
    })
}

/// JSON printed for a failed spawn.
pub fn failure_json(error: &DroneError) -> Value {
    let stderr = match error {
        DroneError::Spawn(SpawnError::PrematureExit { stderr }) => Some(stderr.as_str()),
        _ => None,
    };
    json!({
        "success": false,
        "error": error.to_string(),
        "stderr": stderr,
    })
}

pub async fn run_spawn(options: SpawnOptions) -> Result<()> {
    let config = Arc::new(load_config(options.config_path.as_deref())?);
    let request = spawn_request(&options, &config)?;

    let socket = config.report_socket_expanded();
    let hub = PortReportHub::new();
    let listener = PortReportHub::bind(&socket)?;
    let mut server = tokio::spawn(hub.clone().serve_listener(listener));

    let drones = Drones::new(
        DroneSpawner::new(config.clone(), hub),
        config.apps_dir_expanded(),
    );

    let info = match drones.start(request).await {
        Ok(info) => info,
        Err(e) => {
            println!("{}", failure_json(&e));
            server.abort();
            let _ = std::fs::remove_file(&socket);
            return Err(e.into());
        }
    };
    println!("{}", success_json(&info));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
        result = &mut server => {
            match result {
                Ok(Err(e)) => tracing::error!(error = %e, "Report socket failed"),
                Err(e) => tracing::error!(error = %e, "Report socket task failed"),
                Ok(Ok(())) => {}
            }
        }
        _ = all_stopped(&drones) => {
            tracing::info!(app = %info.app, "Drone gave up, exiting");
        }
    }

    drones.stop_all().await;
    server.abort();
    let _ = std::fs::remove_file(&socket);
    Ok(())
}

async fn all_stopped(drones: &Drones<DroneSpawner>) {
    while !drones.list().await.is_empty() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

pub async fn run_clean(config_path: Option<PathBuf>, user: String, name: String) -> Result<()> {
    let config = Arc::new(load_config(config_path.as_deref())?);
    let drones = Drones::new(
        DroneSpawner::new(config.clone(), PortReportHub::new()),
        config.apps_dir_expanded(),
    );
    let app = AppIdentity::new(user, name);
    drones.clean(&app).await?;
    println!("Cleaned {app}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::PortAssignment;
    use uuid::Uuid;

    fn options() -> SpawnOptions {
        SpawnOptions {
            config_path: None,
            app: "web".to_string(),
            user: "alice".to_string(),
            script: PathBuf::from("server.js"),
            cwd: Some(PathBuf::from("/srv/apps/alice/web")),
            max_restarts: None,
            env: vec!["NODE_ENV=production".to_string()],
            hide_env: false,
            root: None,
            app_path: None,
            args: vec!["--verbose".to_string()],
        }
    }

    #[test]
    fn test_spawn_request_from_options() {
        let config = Config {
            max_restarts: Some(4),
            ..Config::default()
        };
        let request = spawn_request(&options(), &config).unwrap();
        assert_eq!(request.app, AppIdentity::new("alice", "web"));
        assert_eq!(request.script_args, vec!["--verbose"]);
        assert_eq!(request.env.get("NODE_ENV").map(String::as_str), Some("production"));
        assert_eq!(request.restart, RestartPolicy::Bounded { max: 4 });
        assert!(request.isolation.is_none());
    }

    #[test]
    fn test_cli_restart_limit_wins() {
        let mut opts = options();
        opts.max_restarts = Some(0);
        let request = spawn_request(&opts, &Config::default()).unwrap();
        assert_eq!(request.restart, RestartPolicy::Bounded { max: 0 });
    }

    #[test]
    fn test_bad_env_pair() {
        let mut opts = options();
        opts.env = vec!["NOVALUE".to_string()];
        assert!(spawn_request(&opts, &Config::default()).is_err());
    }

    #[test]
    fn test_isolation_needs_both_paths() {
        let mut opts = options();
        opts.root = Some(PathBuf::from("/srv/jail"));
        opts.app_path = Some(PathBuf::from("/app"));
        let request = spawn_request(&opts, &Config::default()).unwrap();
        let isolation = request.isolation.unwrap();
        assert_eq!(isolation.root, PathBuf::from("/srv/jail"));
        assert_eq!(isolation.app_path, PathBuf::from("/app"));
    }

    #[test]
    fn test_outcome_json() {
        let info = DroneInfo {
            app: AppIdentity::new("alice", "web"),
            spawn_id: Uuid::nil(),
            pid: Some(42),
            socket: PortAssignment {
                host: "127.0.0.1".to_string(),
                port: 4001,
            },
        };
        let value = success_json(&info);
        assert_eq!(value["success"], true);
        assert_eq!(value["socket"]["port"], 4001);
        assert_eq!(value["app"], "alice/web");

        let err = DroneError::Spawn(SpawnError::PrematureExit {
            stderr: "boom".to_string(),
        });
        let value = failure_json(&err);
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "Error spawning drone");
        assert_eq!(value["stderr"], "boom");
    }

    #[test]
    fn test_init_writes_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive").join("hive.toml");
        run_init(Some(path.clone()), false).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.host, Config::default().host);
        assert!(run_init(Some(path.clone()), false).is_err());
        run_init(Some(path), true).unwrap();
    }

    #[tokio::test]
    async fn test_clean_requires_user() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("hive.toml");
        Config {
            apps_dir: dir.path().join("apps").display().to_string(),
            ..Config::default()
        }
        .save(&config_path)
        .unwrap();

        let err = run_clean(Some(config_path), String::new(), "web".to_string())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Both `user` and `name` are required."));
    }
}
