//! Shared job templates and render requests for integration tests

use serde_json::{json, Value};
use std::path::PathBuf;

/// A render request together with the size the service should receive.
#[derive(Debug, Clone)]
pub struct RenderFixture {
    pub prompt: &'static str,
    pub width: i64,
    pub height: i64,
    pub expected_width: u32,
    pub expected_height: u32,
}

pub const RENDER_FIXTURES: &[RenderFixture] = &[
    RenderFixture {
        prompt: "a lighthouse on a cliff at dusk, oil painting",
        width: 1024,
        height: 1024,
        expected_width: 1024,
        expected_height: 1024,
    },
    RenderFixture {
        prompt: "isometric pixel art city block",
        width: 4000,
        height: 10,
        expected_width: 2048,
        expected_height: 512,
    },
    RenderFixture {
        prompt: "macro photo of a dew drop on a leaf",
        width: 768,
        height: 1344,
        expected_width: 768,
        expected_height: 1344,
    },
];

/// Minimal template with the three default injection points.
pub fn minimal_template() -> Value {
    json!({
        "41": {"class_type": "EmptyLatentImage", "inputs": {"width": 1024, "height": 1024, "batch_size": 1}},
        "44": {"class_type": "KSampler", "inputs": {"seed": 0, "steps": 4}},
        "45": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "ComfyUI", "images": ["8", 0]}}
    })
}

/// The template shipped with the crate.
pub fn bundled_workflow_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("workflows")
        .join("text_to_image.json")
}
