//! Tracks loaded services by name and dispatches inference calls through
//! their handler (C6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use worker_protocol::codec::{RequestBatchEntry, Value};
use worker_protocol::error::ProtocolError;
use worker_protocol::metrics::{timed, MetricsStore, INFERENCE_METRIC, POSTPROCESS_METRIC, PREPROCESS_METRIC};
use worker_protocol::Result;

use crate::handler::{HandlerInitContext, HandlerRegistry, ServiceHandler};
use crate::loader::Manifest;

/// A loaded model: its manifest, the resolved handler it was loaded with,
/// the handler instance itself, and the metrics store bound to it.
pub struct LoadedService {
    pub manifest: Manifest,
    pub handler_path: PathBuf,
    pub gpu_id: i32,
    pub batch_size: i32,
    handler: Box<dyn ServiceHandler>,
    pub metrics: MetricsStore,
}

/// Owns every currently-loaded service, keyed by model name.
///
/// Mutated only from the worker loop (§5) -- no internal locking, since the
/// worker is single-threaded and request-serial.
pub struct ServiceManager {
    registry: HandlerRegistry,
    services: HashMap<String, LoadedService>,
}

impl ServiceManager {
    /// Build a manager that resolves handlers through `registry`.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            services: HashMap::new(),
        }
    }

    /// Instantiate the handler named by `handler_path`, initialize it, and
    /// register the resulting service under `name`. Re-registering an
    /// existing name replaces the previous entry (and its metrics store).
    #[allow(clippy::too_many_arguments)]
    pub fn register_and_load(
        &mut self,
        name: &str,
        model_dir: &Path,
        manifest: Manifest,
        handler_path: PathBuf,
        gpu_id: i32,
        batch_size: i32,
    ) -> Result<()> {
        let mut handler = self.registry.construct(&handler_path)?;
        let ctx = HandlerInitContext {
            model_name: name.to_string(),
            model_dir: model_dir.to_path_buf(),
            manifest: manifest.clone(),
            gpu_id,
            batch_size,
        };
        handler.init(&ctx)?;
        self.services.insert(
            name.to_string(),
            LoadedService {
                manifest,
                handler_path,
                gpu_id,
                batch_size,
                handler,
                metrics: MetricsStore::new(name),
            },
        );
        Ok(())
    }

    /// Look up a loaded service by name.
    pub fn get_loaded(&self, name: &str) -> Result<&LoadedService> {
        self.services
            .get(name)
            .ok_or_else(|| ProtocolError::ModelServiceNotLoaded(name.to_string()))
    }

    /// Flush a service's buffered metric samples to `out`. A no-op, aside
    /// from a warning, if `name` names nothing loaded -- metrics emission
    /// must never fail a predict response.
    pub fn emit_metrics<W: std::io::Write>(&mut self, name: &str, out: &mut W) {
        match self.services.get_mut(name) {
            Some(service) => service.metrics.emit(out),
            None => tracing::warn!(model = name, "emit_metrics on a service that is not loaded"),
        }
    }

    /// Remove a loaded service. Absence of `name` is
    /// `MODEL_CURRENTLY_NOT_LOADED`.
    pub fn unload(&mut self, name: &str) -> Result<()> {
        self.services
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProtocolError::ModelCurrentlyNotLoaded(name.to_string()))
    }

    /// Run `batch` through the named service's preprocess/inference/postprocess
    /// pipeline, timing each stage into its metrics store. Handler failures
    /// surface as `CustomServiceError` carrying the handler's own message.
    pub fn inference(&mut self, name: &str, batch: &[RequestBatchEntry]) -> Result<Vec<(String, Value)>> {
        let service = self
            .services
            .get_mut(name)
            .ok_or_else(|| ProtocolError::ModelServiceNotLoaded(name.to_string()))?;

        let (preprocessed, pre_ms) = timed(|| service.handler.preprocess(batch));
        let preprocessed = preprocessed.map_err(wrap_custom)?;

        let (inferred, infer_ms) = timed(|| service.handler.inference(preprocessed));
        let inferred = inferred.map_err(wrap_custom)?;

        let (postprocessed, post_ms) = timed(|| service.handler.postprocess(inferred));
        let postprocessed = postprocessed.map_err(wrap_custom)?;

        service.metrics.add_time(PREPROCESS_METRIC, pre_ms);
        service.metrics.add_time(INFERENCE_METRIC, infer_ms);
        service.metrics.add_time(POSTPROCESS_METRIC, post_ms);

        Ok(postprocessed)
    }
}

fn wrap_custom(err: ProtocolError) -> ProtocolError {
    ProtocolError::CustomServiceError(err.message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use worker_protocol::codec::ModelInput;

    fn manager() -> ServiceManager {
        ServiceManager::new(HandlerRegistry::with_builtins())
    }

    fn load_echo(manager: &mut ServiceManager, name: &str, batch_size: i32) {
        manager
            .register_and_load(
                name,
                Path::new("/models/m"),
                Manifest::default(),
                PathBuf::from("/models/m/echo.py"),
                -1,
                batch_size,
            )
            .unwrap();
    }

    #[test]
    fn register_and_load_then_get_loaded_round_trips() {
        let mut manager = manager();
        load_echo(&mut manager, "m", 1);
        let service = manager.get_loaded("m").unwrap();
        assert_eq!(service.batch_size, 1);
    }

    #[test]
    fn get_loaded_on_unknown_name_is_not_loaded() {
        let manager = manager();
        let err = manager.get_loaded("missing").unwrap_err();
        assert!(matches!(err, ProtocolError::ModelServiceNotLoaded(_)));
    }

    #[test]
    fn re_registering_a_name_replaces_the_entry() {
        let mut manager = manager();
        load_echo(&mut manager, "m", 1);
        load_echo(&mut manager, "m", 4);
        assert_eq!(manager.get_loaded("m").unwrap().batch_size, 4);
    }

    #[test]
    fn unload_absent_name_is_currently_not_loaded() {
        let mut manager = manager();
        let err = manager.unload("m").unwrap_err();
        assert!(matches!(err, ProtocolError::ModelCurrentlyNotLoaded(_)));
    }

    #[test]
    fn unload_then_unload_again_is_idempotent_failure_the_second_time() {
        let mut manager = manager();
        load_echo(&mut manager, "m", 1);
        assert!(manager.unload("m").is_ok());
        assert!(matches!(
            manager.unload("m").unwrap_err(),
            ProtocolError::ModelCurrentlyNotLoaded(_)
        ));
    }

    #[test]
    fn inference_runs_the_echo_handler_and_records_three_timers() {
        let mut manager = manager();
        load_echo(&mut manager, "m", 1);
        let batch = vec![RequestBatchEntry {
            request_id: "req-1".into(),
            content_type: "application/json".into(),
            inputs: vec![ModelInput {
                name: "body".into(),
                content_type: "application/json".into(),
                value: Some(b"{\"x\":1}".to_vec()),
            }],
        }];
        let out = manager.inference("m", &batch).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, "req-1");
        assert_eq!(manager.get_loaded("m").unwrap().metrics.len(), 3);
    }

    #[test]
    fn inference_on_unloaded_model_is_not_loaded() {
        let mut manager = manager();
        let err = manager.inference("m", &[]).unwrap_err();
        assert!(matches!(err, ProtocolError::ModelServiceNotLoaded(_)));
    }
}
