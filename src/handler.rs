//! The handler capability contract (§4.5.1) and the built-in handler the
//! worker can always load.
//!
//! The originating system dynamically imports a Python module at load time
//! and instantiates a class from it. This crate has no safe, direct
//! equivalent for that -- and the handler module is explicitly out of scope
//! (§1) -- so it replaces "load arbitrary code found on disk" with a small
//! in-process registry mapping a handler file's resolved name to a
//! constructor for a type implementing [`ServiceHandler`]. A deployment
//! registers the handlers it ships (or a subprocess-bridge handler that
//! shells out to a real model-serving process) before constructing the
//! [`crate::service::ServiceManager`]; this crate ships only [`EchoHandler`]
//! so the worker loop, codec, and service manager are exercisable end to end
//! without a real model.

use std::collections::HashMap;
use std::path::Path;
use worker_protocol::codec::{ModelInput, RequestBatchEntry, Value};
use worker_protocol::error::ProtocolError;
use worker_protocol::Result;

use crate::loader::Manifest;

/// Everything a handler needs to initialize itself for one loaded service.
#[derive(Debug, Clone)]
pub struct HandlerInitContext {
    pub model_name: String,
    pub model_dir: std::path::PathBuf,
    pub manifest: Manifest,
    pub gpu_id: i32,
    pub batch_size: i32,
}

/// One request-batch entry carried through preprocess/inference/postprocess.
/// Distinct from [`RequestBatchEntry`] only in name -- handlers work with
/// this alias so a future richer intermediate representation (decoded
/// tensors, say) doesn't have to reuse the wire type.
pub type HandlerInput = RequestBatchEntry;

/// The five operations a pluggable inference handler implements, standing in
/// for the originating system's dynamically-loaded Python module (Design
/// Notes, §9).
pub trait ServiceHandler: Send {
    /// One-time setup for a newly loaded service.
    fn init(&mut self, ctx: &HandlerInitContext) -> Result<()>;

    /// Transform raw request inputs into whatever shape `inference` expects.
    fn preprocess(&mut self, batch: &[HandlerInput]) -> Result<Vec<HandlerInput>>;

    /// Run the model over preprocessed inputs.
    fn inference(&mut self, batch: Vec<HandlerInput>) -> Result<Vec<HandlerInput>>;

    /// Turn inference output into one wire [`Value`] per request id, in the
    /// same order as the batch that was handed to `preprocess`.
    fn postprocess(&mut self, batch: Vec<HandlerInput>) -> Result<Vec<(String, Value)>>;

    /// Declared input/output schema, surfaced to operators but not
    /// interpreted by the worker loop itself.
    fn signature(&self) -> serde_json::Value;
}

/// A handler that round-trips its inputs unchanged: each output is the first
/// model input of its request entry, copied through untouched. Exists so the
/// worker is runnable without a real model -- see module docs.
#[derive(Debug, Default)]
pub struct EchoHandler {
    model_name: String,
}

impl ServiceHandler for EchoHandler {
    fn init(&mut self, ctx: &HandlerInitContext) -> Result<()> {
        self.model_name = ctx.model_name.clone();
        Ok(())
    }

    fn preprocess(&mut self, batch: &[HandlerInput]) -> Result<Vec<HandlerInput>> {
        Ok(batch.to_vec())
    }

    fn inference(&mut self, batch: Vec<HandlerInput>) -> Result<Vec<HandlerInput>> {
        Ok(batch)
    }

    fn postprocess(&mut self, batch: Vec<HandlerInput>) -> Result<Vec<(String, Value)>> {
        Ok(batch
            .into_iter()
            .map(|entry| (entry.request_id.clone(), echo_value(&entry)))
            .collect())
    }

    fn signature(&self) -> serde_json::Value {
        serde_json::json!({
            "modelName": self.model_name,
            "inputs": [{"name": "*", "type": "bytes"}],
            "outputs": [{"name": "output", "type": "bytes"}],
        })
    }
}

/// Pick the encoding for an echoed entry's first input the same way the
/// codec would: JSON content types round-trip as parsed JSON, everything
/// else as raw bytes.
fn echo_value(entry: &HandlerInput) -> Value {
    let Some(input) = entry.inputs.first() else {
        return Value::Text(String::new());
    };
    let Some(bytes) = &input.value else {
        return Value::Text(String::new());
    };
    let content_type = if !input.content_type.is_empty() {
        input.content_type.as_str()
    } else {
        entry.content_type.as_str()
    };
    if content_type.to_ascii_lowercase().contains("json") {
        if let Ok(parsed) = serde_json::from_slice(bytes) {
            return Value::Json(parsed);
        }
    }
    Value::Binary(bytes.clone())
}

/// Constructs a fresh, uninitialized handler instance.
type HandlerFactory = Box<dyn Fn() -> Box<dyn ServiceHandler> + Send + Sync>;

/// Maps a handler's resolved name to a constructor for it.
///
/// "Resolved name" mirrors the originating loader's own fallback naming
/// rule: the handler file's last path component with its extension
/// stripped, so `handlerFile: "resnet.py"` and `handlerFile: "resnet"` name
/// the same registry entry.
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    /// An empty registry with no handlers registered.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry pre-populated with the built-in [`EchoHandler`] under the
    /// name `"echo"`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("echo", || Box::<EchoHandler>::default());
        registry
    }

    /// Register a constructor under `name`. Re-registering an existing name
    /// replaces it.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn ServiceHandler> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Construct a fresh handler instance for the handler named at
    /// `handler_path`, resolved per [`handler_key`].
    pub fn construct(&self, handler_path: &Path) -> Result<Box<dyn ServiceHandler>> {
        let key = handler_key(handler_path);
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| ProtocolError::UnknownHandler(key.clone()))?;
        Ok(factory())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// The registry key for a handler file: its file stem, lowercased.
pub fn handler_key(handler_path: &Path) -> String {
    handler_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}
