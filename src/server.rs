use std::{
    env::current_dir,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use gauge_supervisor::{
    ProjectRegistry,
    config::{Config, LaunchConfig},
    error::SupervisorError,
    options::RunOptions,
    protocol::{self, StdioClient},
    resolve, scenario,
    supervisor::{ExecutionSupervisor, Notifier, RunRequest},
    target::RunTarget,
    tool::ToolStatus,
    workspace::{self, MANIFEST_FILE},
};
use lsp_types::{InitializeParams, InitializeResult, MessageType, ServerInfo, WorkspaceFolder};
use serde::Deserialize;
use serde_json::{Value, json};

pub const INVALID_PARAMS: i64 = -32602;
pub const REQUEST_FAILED: i64 = -32803;

/// Parameters of `gauge/execute`.
#[derive(Deserialize, Default, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteParams {
    /// Spec path or URI, or a `path:line` scenario locator. Absent runs
    /// everything.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub options: RunOptions,
    #[serde(default)]
    pub debug: bool,
    /// One-based cursor line used together with `scenarios`.
    #[serde(default)]
    pub cursor_line: Option<u32>,
    /// The language server's scenario list for the target spec.
    #[serde(default)]
    pub scenarios: Option<Value>,
}

pub struct GaugeServer {
    pub workspace_folders: Option<Vec<WorkspaceFolder>>,
    initialization_options: Option<Value>,
    gauge_command: String,
    registry: ProjectRegistry,
    supervisor: ExecutionSupervisor,
}

impl GaugeServer {
    pub fn new(config: &Config) -> Self {
        let client = Arc::new(StdioClient);
        let supervisor = ExecutionSupervisor::builder(client.clone(), client.clone())
            .debugger(client)
            .debugger_settle(config.debugger_settle())
            .build();

        supervisor.on_pre_execute(|event| {
            let params = json!({ "status": event.status, "env": event.env });
            if let Err(error) = protocol::notify(protocol::PRE_EXECUTE_NOTIFICATION, params) {
                log::error!("failed to announce run: {error}");
            }
        });
        supervisor.on_post_execute(|event| {
            let params = json!({
                "projectRoot": event.project_root,
                "aborted": event.aborted,
            });
            if let Err(error) = protocol::notify(protocol::POST_EXECUTE_NOTIFICATION, params) {
                log::error!("failed to announce run end: {error}");
            }
        });

        Self {
            workspace_folders: None,
            initialization_options: None,
            gauge_command: config.gauge_command().to_string(),
            registry: ProjectRegistry::new(),
            supervisor,
        }
    }

    fn project_dir(&self) -> Result<PathBuf, SupervisorError> {
        let folders = self
            .workspace_folders
            .as_ref()
            .ok_or(SupervisorError::NoWorkspaceFolders)?;
        folders
            .first()
            .and_then(|folder| folder.uri.to_file_path().ok())
            .ok_or(SupervisorError::NoWorkspaceFolders)
    }

    #[allow(deprecated)]
    pub fn initialize(
        &mut self,
        id: &Value,
        initialize_params: InitializeParams,
    ) -> Result<(), SupervisorError> {
        self.workspace_folders = initialize_params.workspace_folders.or_else(|| {
            initialize_params.root_uri.map(|uri| {
                vec![WorkspaceFolder {
                    uri,
                    name: "root".to_string(),
                }]
            })
        });
        self.initialization_options = initialize_params.initialization_options;

        let result = InitializeResult {
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            ..InitializeResult::default()
        };
        protocol::send_result(id, result)?;

        match self.project_dir() {
            Ok(project_dir) => {
                let launch = self.launch_config(&project_dir)?;
                for warning in launch.validate() {
                    log::warn!("{warning}");
                    show(MessageType::WARNING, warning);
                }
            }
            Err(error) => log::warn!("{error}; runs need an explicit target"),
        }
        Ok(())
    }

    fn launch_config(&self, root: &Path) -> Result<LaunchConfig, SupervisorError> {
        LaunchConfig::load(root, self.initialization_options.as_ref())
    }

    /// Project root and run request for `params`.
    pub fn run_request(
        &self,
        params: ExecuteParams,
    ) -> Result<(PathBuf, RunRequest), SupervisorError> {
        let base = self
            .project_dir()
            .or_else(|_| current_dir().map_err(SupervisorError::from))?;
        let target = match params.target.as_deref() {
            Some(target) => protocol::uri_to_path(target).parse::<RunTarget>()?,
            None => RunTarget::All,
        };

        // Relative specs are relative to the workspace, not the project.
        let spec = target
            .spec_path()
            .map(|spec| workspace::resolve_path(&base, &spec.to_string_lossy()));
        let target = match (target, &spec) {
            (RunTarget::Scenario { line, .. }, Some(spec)) => RunTarget::Scenario {
                spec: spec.clone(),
                line,
            },
            (RunTarget::Spec(_), Some(spec)) => match (params.cursor_line, &params.scenarios) {
                (Some(line), Some(scenarios)) => {
                    let scenarios = scenario::parse_scenarios(scenarios)?;
                    scenario::resolve_scenario(spec, &scenarios, line)
                }
                _ => RunTarget::Spec(spec.clone()),
            },
            (target, _) => target,
        };

        let root = match &spec {
            Some(spec) => workspace::find_root(spec, &[MANIFEST_FILE])
                .ok_or_else(|| SupervisorError::TargetOutsideProject(spec.clone()))?,
            None => workspace::find_root(&base, &[MANIFEST_FILE]).unwrap_or(base),
        };

        let options = self
            .launch_config(&root)?
            .options
            .overridden_by(&params.options);
        Ok((
            root,
            RunRequest {
                target,
                options,
                debug: params.debug,
            },
        ))
    }

    /// Start a run; the response is sent once it resolves.
    pub fn execute(&mut self, id: Value, params: ExecuteParams) -> Result<(), SupervisorError> {
        let (root, request) = match self.run_request(params) {
            Ok(prepared) => prepared,
            Err(error) => return protocol::send_error(Some(id), INVALID_PARAMS, error.to_string()),
        };
        if self.supervisor.is_executing() {
            return protocol::send_error(
                Some(id),
                REQUEST_FAILED,
                SupervisorError::AlreadyRunning.to_string(),
            );
        }

        let backend = match resolve::resolve_executable(&self.gauge_command) {
            Ok(tool) => self.registry.backend_for(&root, &tool),
            Err(error) => Err(error),
        };
        let backend = match backend {
            Ok(backend) => backend,
            Err(error) => {
                show(MessageType::ERROR, error.to_string());
                return protocol::send_error(Some(id), REQUEST_FAILED, error.to_string());
            }
        };
        log::info!("executing {} in {}", request.target, root.display());

        let handle = match self.supervisor.execute(backend, request) {
            Ok(handle) => handle,
            Err(error) => return protocol::send_error(Some(id), REQUEST_FAILED, error.to_string()),
        };
        thread::Builder::new()
            .name("gauge-run".to_string())
            .spawn(move || {
                let sent = match handle.wait() {
                    Ok(outcome) => protocol::send_result(&id, outcome),
                    Err(error) => protocol::send_error(Some(id), REQUEST_FAILED, error.to_string()),
                };
                if let Err(error) = sent {
                    log::error!("failed to answer execute request: {error}");
                }
            })?;
        Ok(())
    }

    pub fn cancel(&self, id: &Value) -> Result<(), SupervisorError> {
        match self.supervisor.cancel(true) {
            Ok(()) => protocol::send_result(id, Value::Null),
            Err(error) => protocol::send_error(Some(id.clone()), REQUEST_FAILED, error.to_string()),
        }
    }

    pub fn report_path(&self, id: &Value) -> Result<(), SupervisorError> {
        protocol::send_result(id, self.supervisor.last_report_path())
    }

    pub fn version(&self, id: &Value) -> Result<(), SupervisorError> {
        let tool = resolve::resolve_executable(&self.gauge_command)
            .unwrap_or_else(|_| PathBuf::from(&self.gauge_command));
        let status = ToolStatus::detect(&tool);
        match &status {
            ToolStatus::Installed { info } => log::info!("gauge {} found", info.version),
            ToolStatus::NotInstalled => show(
                MessageType::WARNING,
                format!("`{}` is not installed", self.gauge_command),
            ),
            ToolStatus::Unknown { reason } => show(
                MessageType::WARNING,
                format!("Could not determine the installed version: {reason}"),
            ),
        }
        protocol::send_result(id, status)
    }

    pub fn shutdown(&self, id: &Value) -> Result<(), SupervisorError> {
        if let Err(error) = self.supervisor.cancel(true) {
            log::error!("failed to stop the run in flight: {error}");
        }
        protocol::send_result(id, Value::Null)
    }
}

fn show(level: MessageType, message: String) {
    StdioClient.show(level, &message);
}
