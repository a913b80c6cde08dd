//! ComfyUI process supervision.
//!
//! Startup is two steps: launch ComfyUI in the background, then block on
//! the readiness probe. The worker only starts taking jobs once the probe
//! succeeds; any startup failure ends the process with
//! [`EXIT_STARTUP_FAILURE`].

use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};

use liveportrait_comfyui::api::ComfyUIApi;
use liveportrait_comfyui::readiness::{wait_until_ready, ReadinessConfig, ReadinessError};

use crate::config::WorkerConfig;

/// Exit code used when ComfyUI never becomes ready.
pub const EXIT_STARTUP_FAILURE: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to launch ComfyUI ({program}): {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    NotReady(#[from] ReadinessError),

    #[error("ComfyUI exited during startup ({0})")]
    ProcessExited(ExitStatus),

    #[error("Failed to wait on ComfyUI process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Spawn ComfyUI from its directory using the configured command.
///
/// The child is killed when its handle is dropped.
pub fn launch(config: &WorkerConfig) -> Result<Child, StartupError> {
    let Some((program, args)) = config.launch_cmd.split_first() else {
        return Err(StartupError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty launch command"),
        });
    };

    tracing::info!(
        program = %program,
        ?args,
        dir = %config.comfyui_dir.display(),
        "Launching ComfyUI",
    );

    let child = Command::new(program)
        .args(args)
        .current_dir(&config.comfyui_dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| StartupError::Spawn {
            program: program.clone(),
            source,
        })?;

    tracing::info!(pid = child.id(), "ComfyUI process started");
    Ok(child)
}

/// Block until ComfyUI answers its health endpoint.
///
/// With a child process, the probe races against the child exiting so a
/// crash during startup is reported immediately instead of at the deadline.
pub async fn await_ready(
    child: Option<&mut Child>,
    api: &ComfyUIApi,
    readiness: &ReadinessConfig,
) -> Result<u32, StartupError> {
    let Some(child) = child else {
        return Ok(wait_until_ready(api, readiness).await?);
    };

    tokio::select! {
        ready = wait_until_ready(api, readiness) => Ok(ready?),
        status = child.wait() => match status {
            Ok(status) => {
                tracing::error!(%status, "ComfyUI exited before becoming ready");
                Err(StartupError::ProcessExited(status))
            }
            Err(e) => Err(StartupError::Wait(e)),
        },
    }
}

/// Resolve when the supervised process exits; never resolves without one.
pub async fn wait_exit(child: Option<&mut Child>) -> std::io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

/// Kill the supervised process, if any.
pub async fn terminate(child: Option<&mut Child>) {
    let Some(child) = child else { return };
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    match child.kill().await {
        Ok(()) => tracing::info!("ComfyUI process stopped"),
        Err(e) => tracing::warn!(error = %e, "Failed to stop ComfyUI process"),
    }
}
