//! Resolves a model directory into a parsed manifest and an absolute handler
//! path, without executing any handler code (C5).
//!
//! Grounded on the manifest shape and error messages exercised by the
//! originating `ModelLoader.load` unit tests: a missing or unparsable
//! `MANIFEST.json` is a hard failure, each of `parametersFile`/`symbolFile`
//! must both be declared in the manifest and exist on disk, and the handler
//! file named at load time must exist under the model directory. The
//! doubled "not" in the handler-not-found message is intentional -- see
//! `SPEC_FULL.md` §9.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use worker_protocol::error::ProtocolError;
use worker_protocol::Result;

/// Name of the manifest file every model package must carry.
pub const MANIFEST_FILENAME: &str = "MANIFEST.json";

/// The `model` substructure of a manifest.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ModelSection {
    #[serde(rename = "parametersFile")]
    pub parameters_file: Option<String>,
    #[serde(rename = "symbolFile")]
    pub symbol_file: Option<String>,
}

/// The `engine` substructure of a manifest.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct EngineSection {
    #[serde(rename = "engineName")]
    pub engine_name: Option<String>,
}

/// Parsed `MANIFEST.json`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub engine: EngineSection,
}

/// Resolve `model_dir/MANIFEST.json`, validate its required fields exist on
/// disk, and resolve `handler_file` to an absolute path under `model_dir`.
///
/// Does not instantiate or execute the handler -- that is
/// [`crate::service::ServiceManager`]'s job, once this has produced a
/// manifest and a path for it to hand to a [`crate::handler::HandlerRegistry`].
pub fn load(model_dir: &Path, handler_file: Option<&str>) -> Result<(Manifest, PathBuf)> {
    let manifest_path = model_dir.join(MANIFEST_FILENAME);
    let text = std::fs::read_to_string(&manifest_path).map_err(|e| ProtocolError::ManifestRead {
        path: manifest_path.display().to_string(),
        reason: e.to_string(),
    })?;
    let manifest: Manifest =
        serde_json::from_str(&text).map_err(|e| ProtocolError::ManifestRead {
            path: manifest_path.display().to_string(),
            reason: e.to_string(),
        })?;

    require_file(model_dir, manifest.model.parameters_file.as_deref(), "parameterFile")?;
    require_file(model_dir, manifest.model.symbol_file.as_deref(), "symbolFile")?;

    let handler_file = handler_file.ok_or(ProtocolError::NoHandlerProvided)?;
    let handler_path = model_dir.join(handler_file);
    if !handler_path.exists() {
        return Err(ProtocolError::HandlerFileNotFound {
            path: handler_path.display().to_string(),
        });
    }

    Ok((manifest, handler_path))
}

/// Require that `field` was declared in the manifest and that, resolved
/// against `model_dir`, it names a file that exists.
fn require_file(model_dir: &Path, declared: Option<&str>, field: &'static str) -> Result<()> {
    let declared = declared.ok_or(ProtocolError::ManifestFieldMissing { field })?;
    let resolved = model_dir.join(declared);
    if !resolved.exists() {
        return Err(ProtocolError::ManifestFileNotFound {
            field,
            path: resolved.display().to_string(),
        });
    }
    Ok(())
}
