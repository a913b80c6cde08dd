//! Serverless job handler.
//!
//! Translates one job into a ComfyUI workflow run: stage the inputs,
//! submit the LivePortrait graph, wait for it to finish, and return the
//! generated video as a base64 data URI. Every failure is reported in the
//! job output rather than as a transport error.

use std::path::PathBuf;

use liveportrait_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use liveportrait_comfyui::execution::{wait_for_completion, ExecutionConfig, ExecutionError};
use liveportrait_comfyui::history::HistoryEntry;
use liveportrait_core::error::CoreError;
use liveportrait_core::job::{JobInput, JobOutput};
use liveportrait_core::media::{encode_data_uri, mime_for_path, MediaSource};
use liveportrait_core::output::{find_output_video, OutputError};
use liveportrait_core::workflow::{build_workflow, LivePortraitParams};

use crate::staging::{StagedFiles, Stager, StagingError};

/// Longest slice of the job id embedded in staged and output filenames.
const MAX_TAG_LEN: usize = 36;

/// Random hex characters appended to every job tag.
const TAG_SUFFIX_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("Failed to queue prompt: {0}")]
    Submit(#[from] ComfyUIApiError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("Failed to read output video {path}: {source}")]
    ReadOutput {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Filesystem and polling settings for [`JobHandler`].
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub execution: ExecutionConfig,
}

/// Runs LivePortrait jobs against one ComfyUI instance.
pub struct JobHandler {
    api: ComfyUIApi,
    stager: Stager,
    output_dir: PathBuf,
    execution: ExecutionConfig,
}

/// Staged input filenames, relative to the input directory.
struct StagedNames {
    source_image: String,
    driving_video: String,
    audio: Option<String>,
}

impl JobHandler {
    pub fn new(api: ComfyUIApi, http: reqwest::Client, config: HandlerConfig) -> Self {
        Self {
            api,
            stager: Stager::new(http, config.input_dir),
            output_dir: config.output_dir,
            execution: config.execution,
        }
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// Handle one job. Never fails: errors come back as [`JobOutput::Error`].
    pub async fn handle(&self, job_id: &str, input: serde_json::Value) -> JobOutput {
        match self.run(job_id, input).await {
            Ok(data_uri) => {
                tracing::info!(%job_id, bytes = data_uri.len(), "Job completed");
                JobOutput::VideoBase64(data_uri)
            }
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Job failed");
                JobOutput::Error(e.to_string())
            }
        }
    }

    async fn run(&self, job_id: &str, input: serde_json::Value) -> Result<String, HandlerError> {
        let keys: Vec<&str> = input
            .as_object()
            .map(|o| o.keys().map(String::as_str).collect())
            .unwrap_or_default();
        tracing::info!(%job_id, ?keys, "Received job input");

        let job = JobInput::from_value(input)?;
        job.validate()?;

        if !job.flag_do_crop {
            tracing::debug!(%job_id, "flag_do_crop=false has no effect; the cropper always runs");
        }
        if !job.driving_smooth {
            tracing::debug!(%job_id, "driving_smooth=false has no effect on the workflow");
        }

        let tag = job_tag(job_id);
        let mut staged = StagedFiles::default();
        self.stage_and_execute(&job, &tag, &mut staged).await
    }

    async fn stage_and_execute(
        &self,
        job: &JobInput,
        tag: &str,
        staged: &mut StagedFiles,
    ) -> Result<String, HandlerError> {
        let names = self.stage_inputs(job, tag, staged).await?;

        let params = LivePortraitParams::from_job(
            job,
            names.source_image,
            names.driving_video,
            names.audio,
            tag,
        );
        let workflow = build_workflow(&params);

        let client_id = uuid::Uuid::new_v4().to_string();
        let submitted = self.api.submit_workflow(&workflow, &client_id).await?;
        tracing::info!(
            prompt_id = %submitted.prompt_id,
            queue_position = submitted.number,
            "Workflow queued",
        );

        let mut pending = PendingPrompt::new(self.api.clone(), submitted.prompt_id.clone());
        let entry = wait_for_completion(&self.api, &submitted.prompt_id, &self.execution).await;
        pending.disarm();
        let path = self.locate_video(&entry?, &params.filename_prefix).await?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| HandlerError::ReadOutput {
                path: path.display().to_string(),
                source,
            })?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "Read output video");

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove output video");
        }

        Ok(encode_data_uri(mime_for_path(&path), &bytes))
    }

    async fn stage_inputs(
        &self,
        job: &JobInput,
        tag: &str,
        staged: &mut StagedFiles,
    ) -> Result<StagedNames, HandlerError> {
        let missing = |what: &str| CoreError::Validation(format!("{what} is required"));

        let source = job
            .source_image()
            .ok_or_else(|| missing("source_image or source_image_url"))?;
        let source_image = format!("{tag}_source.png");
        self.stage_one(&source, &source_image, staged).await?;

        let driving = job
            .driving_video()
            .ok_or_else(|| missing("driving_video or driving_video_url"))?;
        let driving_video = format!("{tag}_driving.mp4");
        self.stage_one(&driving, &driving_video, staged).await?;

        let audio = match job.audio() {
            Some(audio) => {
                let name = format!("{tag}_audio.wav");
                self.stage_one(&audio, &name, staged).await?;
                Some(name)
            }
            None => None,
        };

        Ok(StagedNames {
            source_image,
            driving_video,
            audio,
        })
    }

    /// Register the target path before writing so a partial file is removed too.
    async fn stage_one(
        &self,
        source: &MediaSource,
        file_name: &str,
        staged: &mut StagedFiles,
    ) -> Result<(), HandlerError> {
        staged.push(self.stager.dir().join(file_name));
        self.stager.stage(source, file_name).await?;
        Ok(())
    }

    /// Prefer files reported in history; fall back to scanning the output directory.
    async fn locate_video(
        &self,
        entry: &HistoryEntry,
        prefix: &str,
    ) -> Result<PathBuf, HandlerError> {
        for file in entry.video_files() {
            let path = self.output_dir.join(file.relative_path());
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(path);
            }
            tracing::warn!(path = %path.display(), "Reported output missing on disk");
        }

        let dir = self.output_dir.clone();
        let prefix = prefix.to_string();
        let found = tokio::task::spawn_blocking(move || find_output_video(&dir, &prefix))
            .await
            .map_err(|e| HandlerError::Internal(format!("output scan panicked: {e}")))??;
        Ok(found)
    }
}

/// Prompt submitted to ComfyUI whose outcome nobody has observed yet.
///
/// Dropped while armed (the job future was cancelled), it removes the
/// prompt from the ComfyUI queue in the background.
struct PendingPrompt {
    api: ComfyUIApi,
    prompt_id: String,
    armed: bool,
}

impl PendingPrompt {
    fn new(api: ComfyUIApi, prompt_id: String) -> Self {
        Self {
            api,
            prompt_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingPrompt {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let api = self.api.clone();
        let prompt_id = std::mem::take(&mut self.prompt_id);
        tracing::warn!(%prompt_id, "Job abandoned, dequeuing prompt");
        runtime.spawn(async move {
            if let Err(e) = api.cancel_execution(&prompt_id).await {
                tracing::warn!(%prompt_id, error = %e, "Failed to dequeue abandoned prompt");
            }
        });
    }
}

/// Filename-safe tag derived from the job id.
///
/// A random suffix keeps tags unique even for ids that sanitize or
/// truncate to the same prefix, or for repeated ids.
pub fn job_tag(job_id: &str) -> String {
    let base: String = job_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_TAG_LEN)
        .collect();

    let mut suffix = uuid::Uuid::new_v4().simple().to_string();
    suffix.truncate(TAG_SUFFIX_LEN);

    if base.is_empty() {
        suffix
    } else {
        format!("{base}_{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_of(tag: &str) -> &str {
        tag.rsplit_once('_').map(|(base, _)| base).unwrap_or("")
    }

    #[test]
    fn job_tag_keeps_safe_characters() {
        assert_eq!(base_of(&job_tag("sync-abc_123")), "sync-abc_123");
        assert_eq!(base_of(&job_tag("../../etc/passwd")), "etcpasswd");
    }

    #[test]
    fn job_tag_is_bounded() {
        assert_eq!(job_tag(&"a".repeat(100)).len(), MAX_TAG_LEN + 1 + TAG_SUFFIX_LEN);
    }

    #[test]
    fn colliding_ids_get_distinct_tags() {
        assert_ne!(job_tag("a/b"), job_tag("ab"));
        assert_ne!(job_tag("same-id"), job_tag("same-id"));
        let long = "x".repeat(40);
        assert_ne!(job_tag(&format!("{long}1")), job_tag(&format!("{long}2")));
    }

    #[test]
    fn empty_job_tag_is_only_suffix() {
        let tag = job_tag("///");
        assert_eq!(tag.len(), TAG_SUFFIX_LEN);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
