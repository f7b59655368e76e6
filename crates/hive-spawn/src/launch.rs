// ABOUTME: Builds the command line for a drone from its request and plugins.
// ABOUTME: launcher, plugin options, script, then the bootstrap positionals and app args.

use hive_core::{Isolation, SpawnRequest};
use hive_monitor::CommandLine;
use std::path::PathBuf;
use uuid::Uuid;

/// Command line pieces after plugins have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub launcher: String,
    /// Option tokens from every plugin, in plugin order
    pub options: Vec<String>,
    pub script: PathBuf,
    pub script_args: Vec<String>,
}

impl LaunchPlan {
    /// Merge plugin contributions into the request's script and arguments.
    /// Plugins are applied in name order; a later override replaces an earlier one.
    pub fn build(launcher: &str, request: &SpawnRequest) -> Self {
        let mut plan = Self {
            launcher: launcher.to_string(),
            options: Vec::new(),
            script: request.start_script.clone(),
            script_args: request.script_args.clone(),
        };

        for (plugin, spawn) in &request.plugins {
            tracing::info!(
                app = %request.app,
                plugin = %plugin,
                event = "plugin:argv",
                "Applying plugin arguments"
            );
            if let Some(script) = &spawn.script {
                plan.script = script.clone();
            }
            if let Some(args) = &spawn.script_args {
                plan.script_args = args.clone();
            }
            plan.options.extend(spawn.argv.iter().cloned());
        }

        plan
    }

    /// Rewrite the script arguments into the bootstrap's positional layout:
    /// `<server> <port> [<root> <app_path>] -- <app args>`.
    pub fn with_bootstrap(mut self, server: Uuid, port: u16, isolation: Option<&Isolation>) -> Self {
        let mut args = vec![server.to_string(), port.to_string()];
        if let Some(isolation) = isolation {
            args.push(isolation.root.display().to_string());
            args.push(isolation.app_path.display().to_string());
        }
        args.push("--".to_string());
        args.append(&mut self.script_args);
        self.script_args = args;
        self
    }

    pub fn command_line(&self) -> CommandLine {
        CommandLine::new(&self.launcher)
            .args(self.options.iter().cloned())
            .arg(self.script.display().to_string())
            .args(self.script_args.iter().cloned())
    }
}
