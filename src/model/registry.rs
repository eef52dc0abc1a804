use crate::error::{BatchError, Result};
use serde::Serialize;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

/// Marker in the model name of the HP3 family; forwarded to the backend on
/// every separation call.
pub const HP3_MARKER: &str = "HP3";

/// Marker of the dereverb model that is built from two networks instead of
/// one and therefore needs a different release path.
pub const DUAL_NET_MARKER: &str = "onnx_dereverb_By_FoxJoy";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelShape {
    Single,
    DualNet,
}

impl ModelShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelShape::Single => "single",
            ModelShape::DualNet => "dual_net",
        }
    }
}

impl fmt::Display for ModelShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the batch derives from the model name, resolved once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelProfile {
    pub name: String,
    pub shape: ModelShape,
    pub is_hp3: bool,
}

impl ModelProfile {
    pub fn from_name(model_name: &str) -> Self {
        let name = model_name.trim().to_string();
        let shape = if name.contains(DUAL_NET_MARKER) {
            ModelShape::DualNet
        } else {
            ModelShape::Single
        };
        let is_hp3 = name.contains(HP3_MARKER);
        Self {
            name,
            shape,
            is_hp3,
        }
    }
}

pub fn weights_path(weights_root: &Path, model_name: &str) -> PathBuf {
    weights_root.join(format!("{model_name}.pth"))
}

/// Fails with [`BatchError::MissingWeights`] when the weights file is absent.
pub fn resolve_weights(weights_root: &Path, model_name: &str) -> Result<PathBuf> {
    let path = weights_path(weights_root, model_name);
    if !path.is_file() {
        return Err(BatchError::MissingWeights {
            path: path.display().to_string(),
        });
    }
    Ok(path)
}

/// Model names under `weights_root` that [`resolve_weights`] accepts, sorted.
pub fn list_models(weights_root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(weights_root)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_string_lossy().strip_suffix(".pth").map(str::to_owned)
        else {
            continue;
        };
        if entry.path().is_file() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
