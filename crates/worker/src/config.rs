use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use liveportrait_comfyui::execution::ExecutionConfig;
use liveportrait_comfyui::readiness::{ReadinessConfig, DEFAULT_HEALTH_PATH};

/// How the worker receives jobs once ComfyUI is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Local HTTP API (`POST /runsync`).
    Serve,
    /// Pull jobs from the serverless platform.
    Poll,
}

impl FromStr for WorkerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serve" => Ok(Self::Serve),
            "poll" => Ok(Self::Poll),
            other => Err(format!("expected 'serve' or 'poll', got '{other}'")),
        }
    }
}

/// Serverless platform job endpoints (poll mode only).
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Job fetch URL; `$ID` is replaced with the worker id.
    pub job_get_url: String,
    /// Result URL; `$ID` is replaced with the job id and `$RUNPOD_POD_ID`
    /// with the worker id.
    pub job_done_url: String,
    /// Sent verbatim as the `Authorization` header.
    pub api_key: Option<String>,
    pub worker_id: String,
}

/// Worker configuration loaded from environment variables.
///
/// All fields except the platform endpoints have defaults matching the
/// container layout.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// ComfyUI checkout; its `input/` and `output/` directories are used.
    pub comfyui_dir: PathBuf,
    /// Base HTTP URL of the local ComfyUI server.
    pub comfyui_url: String,
    /// Program and arguments used to launch ComfyUI.
    pub launch_cmd: Vec<String>,
    /// Skip launching ComfyUI and only wait for it.
    pub comfyui_external: bool,
    pub readiness: ReadinessConfig,
    pub execution: ExecutionConfig,
    pub mode: WorkerMode,
    /// Bind address for the local API (default: `0.0.0.0`).
    pub host: String,
    /// Bind port for the local API (default: `8000`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `600`).
    pub request_timeout_secs: u64,
    /// Required when `mode` is [`WorkerMode::Poll`].
    pub platform: Option<PlatformConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} environment variable is required")]
    Missing { var: &'static str },

    #[error("{var}='{value}' is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                        | Default                                         |
    /// |--------------------------------|-------------------------------------------------|
    /// | `COMFYUI_DIR`                  | `/content/ComfyUI`                              |
    /// | `COMFYUI_URL`                  | `http://127.0.0.1:7860`                         |
    /// | `COMFYUI_LAUNCH_CMD`           | `python main.py --listen 127.0.0.1 --port 7860` |
    /// | `COMFYUI_EXTERNAL`             | `false`                                         |
    /// | `COMFYUI_HEALTH_PATH`          | `/system_stats`                                 |
    /// | `READY_POLL_INTERVAL_SECS`     | `2`                                             |
    /// | `READY_TIMEOUT_SECS`           | `120`                                           |
    /// | `EXECUTION_POLL_INTERVAL_SECS` | `2`                                             |
    /// | `EXECUTION_TIMEOUT_SECS`       | `300`                                           |
    /// | `WORKER_MODE`                  | `serve`                                         |
    /// | `HOST` / `PORT`                | `0.0.0.0` / `8000`                              |
    /// | `REQUEST_TIMEOUT_SECS`         | `600`                                           |
    /// | `RUNPOD_WEBHOOK_GET_JOB`       | required in poll mode                           |
    /// | `RUNPOD_WEBHOOK_POST_OUTPUT`   | required in poll mode                           |
    /// | `RUNPOD_AI_API_KEY`            | unset                                           |
    /// | `RUNPOD_POD_ID`                | `local`                                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let comfyui_dir = PathBuf::from(var("COMFYUI_DIR").unwrap_or_else(|| "/content/ComfyUI".into()));
        let comfyui_url = var("COMFYUI_URL").unwrap_or_else(|| "http://127.0.0.1:7860".into());

        let launch_cmd: Vec<String> = var("COMFYUI_LAUNCH_CMD")
            .unwrap_or_else(|| "python main.py --listen 127.0.0.1 --port 7860".into())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let comfyui_external = parse_bool("COMFYUI_EXTERNAL", var("COMFYUI_EXTERNAL"), false)?;

        let readiness = ReadinessConfig {
            interval: parse_secs("READY_POLL_INTERVAL_SECS", var("READY_POLL_INTERVAL_SECS"), 2)?,
            timeout: parse_secs("READY_TIMEOUT_SECS", var("READY_TIMEOUT_SECS"), 120)?,
            health_path: var("COMFYUI_HEALTH_PATH").unwrap_or_else(|| DEFAULT_HEALTH_PATH.into()),
        };

        let execution = ExecutionConfig {
            interval: parse_secs(
                "EXECUTION_POLL_INTERVAL_SECS",
                var("EXECUTION_POLL_INTERVAL_SECS"),
                2,
            )?,
            timeout: parse_secs("EXECUTION_TIMEOUT_SECS", var("EXECUTION_TIMEOUT_SECS"), 300)?,
        };

        let mode: WorkerMode = parse_or("WORKER_MODE", var("WORKER_MODE"), WorkerMode::Serve)?;

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or("PORT", var("PORT"), 8000)?;
        let request_timeout_secs: u64 =
            parse_or("REQUEST_TIMEOUT_SECS", var("REQUEST_TIMEOUT_SECS"), 600)?;

        let platform = match mode {
            WorkerMode::Serve => None,
            WorkerMode::Poll => Some(PlatformConfig {
                job_get_url: var("RUNPOD_WEBHOOK_GET_JOB").ok_or(ConfigError::Missing {
                    var: "RUNPOD_WEBHOOK_GET_JOB",
                })?,
                job_done_url: var("RUNPOD_WEBHOOK_POST_OUTPUT").ok_or(ConfigError::Missing {
                    var: "RUNPOD_WEBHOOK_POST_OUTPUT",
                })?,
                api_key: var("RUNPOD_AI_API_KEY"),
                worker_id: var("RUNPOD_POD_ID").unwrap_or_else(|| "local".into()),
            }),
        };

        Ok(Self {
            comfyui_dir,
            comfyui_url,
            launch_cmd,
            comfyui_external,
            readiness,
            execution,
            mode,
            host,
            port,
            request_timeout_secs,
            platform,
        })
    }

    /// Directory ComfyUI loads inputs from.
    pub fn input_dir(&self) -> PathBuf {
        self.comfyui_dir.join("input")
    }

    /// Directory ComfyUI saves outputs to.
    pub fn output_dir(&self) -> PathBuf {
        self.comfyui_dir.join("output")
    }
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_secs(var: &'static str, value: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    parse_or(var, value, default).map(Duration::from_secs)
}

fn parse_bool(var: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::Invalid {
            var,
            value: v,
            reason: "expected a boolean".into(),
        }),
    }
}
