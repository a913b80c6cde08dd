//! LivePortrait workflow graph in ComfyUI API format.
//!
//! The graph is a JSON object keyed by node id; links are
//! `[source_node_id, output_index]` pairs.
//!
//! ```text
//! 1 DownloadAndLoadLivePortraitModels ─┐
//! 2 LivePortraitLoadCropper ──────────┐│
//! 3 LoadImage ─────────────────────► 5 LivePortraitCropper
//! 4 VHS_LoadVideo ─┐                   │ crop_info
//!                  └───────────────► 6 LivePortraitProcess
//!                                      │
//!                     (pasteback) ─► 8 LivePortraitComposite
//!                                      │
//!                     (audio)  9 ────► 7 VHS_VideoCombine
//! ```

use serde_json::{json, Map, Value};

use crate::job::JobInput;

pub const MODELS_NODE: &str = "1";
pub const CROPPER_LOADER_NODE: &str = "2";
pub const SOURCE_IMAGE_NODE: &str = "3";
pub const DRIVING_VIDEO_NODE: &str = "4";
pub const CROP_NODE: &str = "5";
pub const PROCESS_NODE: &str = "6";
pub const VIDEO_COMBINE_NODE: &str = "7";
pub const COMPOSITE_NODE: &str = "8";
pub const AUDIO_NODE: &str = "9";

/// Filename prefix shared by every generated video.
pub const OUTPUT_PREFIX: &str = "liveportrait_output";

const FRAME_RATE: u32 = 25;
const SMOOTH_OBSERVATION_VARIANCE: f64 = 3e-6;

/// Everything needed to render the graph for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePortraitParams {
    /// Source image filename inside the ComfyUI input directory.
    pub source_image: String,
    /// Driving video filename inside the ComfyUI input directory.
    pub driving_video: String,
    /// Optional audio filename inside the ComfyUI input directory.
    pub audio: Option<String>,
    pub driving_multiplier: f64,
    pub relative_motion_mode: String,
    pub pasteback: bool,
    /// Prefix passed to `VHS_VideoCombine`; starts with [`OUTPUT_PREFIX`].
    pub filename_prefix: String,
}

impl LivePortraitParams {
    /// Derive parameters from a validated job input and its staged filenames.
    pub fn from_job(
        job: &JobInput,
        source_image: String,
        driving_video: String,
        audio: Option<String>,
        job_tag: &str,
    ) -> Self {
        Self {
            source_image,
            driving_video,
            audio,
            driving_multiplier: job.driving_multiplier,
            relative_motion_mode: job.motion_mode().to_string(),
            pasteback: job.flag_pasteback,
            filename_prefix: format!("{OUTPUT_PREFIX}_{job_tag}"),
        }
    }
}

fn link(node: &str, index: u32) -> Value {
    json!([node, index])
}

/// Render the ComfyUI API-format workflow.
pub fn build_workflow(params: &LivePortraitParams) -> Value {
    let mut graph = Map::new();

    graph.insert(
        MODELS_NODE.into(),
        json!({
            "class_type": "DownloadAndLoadLivePortraitModels",
            "inputs": {
                "precision": "auto",
                "mode": "human"
            }
        }),
    );

    graph.insert(
        CROPPER_LOADER_NODE.into(),
        json!({
            "class_type": "LivePortraitLoadCropper",
            "inputs": {
                "onnx_device": "CUDA",
                "keep_model_loaded": true,
                "detection_threshold": 0.5
            }
        }),
    );

    graph.insert(
        SOURCE_IMAGE_NODE.into(),
        json!({
            "class_type": "LoadImage",
            "inputs": { "image": params.source_image }
        }),
    );

    graph.insert(
        DRIVING_VIDEO_NODE.into(),
        json!({
            "class_type": "VHS_LoadVideo",
            "inputs": {
                "video": params.driving_video,
                "force_rate": 0,
                "custom_width": 0,
                "custom_height": 0,
                "frame_load_cap": 0,
                "skip_first_frames": 0,
                "select_every_nth": 1
            }
        }),
    );

    graph.insert(
        CROP_NODE.into(),
        json!({
            "class_type": "LivePortraitCropper",
            "inputs": {
                "pipeline": link(MODELS_NODE, 0),
                "cropper": link(CROPPER_LOADER_NODE, 0),
                "source_image": link(SOURCE_IMAGE_NODE, 0),
                "dsize": 512,
                "scale": 2.3,
                "vx_ratio": 0.0,
                "vy_ratio": -0.125,
                "face_index": 0,
                "face_index_order": "large-small",
                "rotate": true
            }
        }),
    );

    // Cropper output 1 is CROPINFO; output 0 is the cropped image.
    graph.insert(
        PROCESS_NODE.into(),
        json!({
            "class_type": "LivePortraitProcess",
            "inputs": {
                "pipeline": link(MODELS_NODE, 0),
                "crop_info": link(CROP_NODE, 1),
                "source_image": link(SOURCE_IMAGE_NODE, 0),
                "driving_images": link(DRIVING_VIDEO_NODE, 0),
                "lip_zero": false,
                "lip_zero_threshold": 0.03,
                "stitching": true,
                "delta_multiplier": params.driving_multiplier,
                "mismatch_method": "constant",
                "relative_motion_mode": params.relative_motion_mode,
                "driving_smooth_observation_variance": SMOOTH_OBSERVATION_VARIANCE,
                "expression_friendly": false,
                "expression_friendly_multiplier": 1.0
            }
        }),
    );

    let frames = if params.pasteback {
        graph.insert(
            COMPOSITE_NODE.into(),
            json!({
                "class_type": "LivePortraitComposite",
                "inputs": {
                    "source_image": link(SOURCE_IMAGE_NODE, 0),
                    "cropped_image": link(PROCESS_NODE, 0),
                    "liveportrait_out": link(PROCESS_NODE, 1)
                }
            }),
        );
        link(COMPOSITE_NODE, 0)
    } else {
        link(PROCESS_NODE, 0)
    };

    let mut combine = json!({
        "images": frames,
        "frame_rate": FRAME_RATE,
        "loop_count": 0,
        "filename_prefix": params.filename_prefix,
        "format": "video/h264-mp4",
        "pingpong": false,
        "save_output": true
    });

    if let Some(audio) = &params.audio {
        graph.insert(
            AUDIO_NODE.into(),
            json!({
                "class_type": "VHS_LoadAudio",
                "inputs": {
                    "audio_file": format!("input/{audio}"),
                    "seek_seconds": 0
                }
            }),
        );
        combine["audio"] = link(AUDIO_NODE, 0);
    }

    graph.insert(
        VIDEO_COMBINE_NODE.into(),
        json!({
            "class_type": "VHS_VideoCombine",
            "inputs": combine
        }),
    );

    Value::Object(graph)
}
