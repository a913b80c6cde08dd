//! Typed view of the ComfyUI `/history/{prompt_id}` response.
//!
//! Only the parts the worker reads are modelled; unknown fields are
//! ignored so newer ComfyUI versions keep parsing.

use std::collections::HashMap;

use serde::Deserialize;

/// `/history` body: prompt id to its finished execution.
pub type History = HashMap<String, HistoryEntry>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Outputs keyed by node id.
    #[serde(default)]
    pub outputs: HashMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

/// Files a node reported. Video Helper Suite nodes report under `gifs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub gifs: Vec<OutputFile>,
    #[serde(default)]
    pub videos: Vec<OutputFile>,
    #[serde(default)]
    pub images: Vec<OutputFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `output`, `temp` or `input`.
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// Raw `[event_name, payload]` pairs.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

impl ExecutionStatus {
    pub fn is_error(&self) -> bool {
        self.status_str == "error"
    }

    /// Exception message from the `execution_error` event, if any.
    pub fn error_message(&self) -> Option<String> {
        self.messages.iter().find_map(|m| {
            let pair = m.as_array()?;
            if pair.first()?.as_str()? != "execution_error" {
                return None;
            }
            pair.get(1)?
                .get("exception_message")?
                .as_str()
                .map(str::to_string)
        })
    }
}

impl OutputFile {
    pub fn is_video(&self) -> bool {
        liveportrait_core::output::is_video(std::path::Path::new(&self.filename))
    }

    /// Path relative to the ComfyUI output directory.
    pub fn relative_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.subfolder).join(&self.filename)
    }
}

impl HistoryEntry {
    /// Saved video files across all nodes, sorted by node id.
    pub fn video_files(&self) -> Vec<&OutputFile> {
        let mut nodes: Vec<_> = self.outputs.iter().collect();
        nodes.sort_by(|a, b| a.0.cmp(b.0));

        nodes
            .into_iter()
            .flat_map(|(_, out)| out.gifs.iter().chain(&out.videos).chain(&out.images))
            .filter(|f| f.is_video() && f.kind != "temp")
            .collect()
    }
}
