//! Promotes decoded-but-unchecked wire payloads into the typed request
//! structs the rest of the crate works with, and flags individually invalid
//! entries within an otherwise-valid predict batch.

use crate::codec::{
    LoadRequest, PredictRequest, RawLoad, RawPredict, RawUnload, RequestBatchEntry, UnloadRequest,
};
use crate::error::{ErrorCode, ProtocolError};
use crate::Result;
use std::collections::HashMap;

/// Confirm a decoded version sentinel matches the one version this crate
/// speaks. `decode` already performs this check inline; this is exposed
/// separately so callers driving their own framing can reuse it.
pub fn validate_message(version: f64) -> bool {
    version == crate::codec::VERSION
}

/// Turn a [`RawLoad`] into a [`LoadRequest`], filling in default `batchSize`
/// and `gpuId` when the client omitted them.
pub fn validate_load_message(raw: RawLoad) -> Result<LoadRequest> {
    let model_path = raw
        .model_path
        .filter(|s| !s.is_empty())
        .ok_or(ProtocolError::InvalidLoadMessage { field: "modelPath" })?;
    let model_name = raw
        .model_name
        .filter(|s| !s.is_empty())
        .ok_or(ProtocolError::InvalidLoadMessage { field: "modelName" })?;
    let handler = raw
        .handler
        .filter(|s| !s.is_empty())
        .ok_or(ProtocolError::InvalidLoadMessage { field: "handler" })?;
    let batch_size = raw.batch_size.unwrap_or(1);
    if batch_size < 1 {
        return Err(ProtocolError::InvalidLoadMessage {
            field: "batchSize",
        });
    }
    let gpu_id = raw.gpu_id.unwrap_or(-1);
    Ok(LoadRequest {
        model_name,
        model_path,
        batch_size,
        handler,
        gpu_id,
    })
}

/// Turn a [`RawPredict`] into a [`PredictRequest`]. Per-input validity is a
/// separate, later concern -- see [`validate_predict_inputs`].
pub fn validate_predict_msg(raw: RawPredict) -> Result<PredictRequest> {
    let model_name = raw
        .model_name
        .filter(|s| !s.is_empty())
        .ok_or(ProtocolError::InvalidPredictMessage {
            reason: "modelName is missing or empty",
        })?;
    let request_batch = raw
        .request_batch
        .filter(|b| !b.is_empty())
        .ok_or(ProtocolError::InvalidPredictMessage {
            reason: "requestBatch is missing or empty",
        })?;
    Ok(PredictRequest {
        model_name,
        request_batch,
    })
}

/// Turn a [`RawUnload`] into an [`UnloadRequest`].
pub fn validate_unload_msg(raw: RawUnload) -> Result<UnloadRequest> {
    let model_name = raw
        .model_name
        .filter(|s| !s.is_empty())
        .ok_or(ProtocolError::InvalidUnloadMessage)?;
    Ok(UnloadRequest { model_name })
}

/// Check that the batch's size matches what the service declared at load
/// time. `UNSUPPORTED_PREDICT_OPERATION` only ever compares counts; it says
/// nothing about individual entries.
pub fn validate_batch_size(batch: &[RequestBatchEntry], declared: i32) -> Result<()> {
    if batch.len() as i32 != declared {
        return Err(ProtocolError::UnsupportedPredictOperation(batch.len()));
    }
    Ok(())
}

/// Scan a request batch for entries that cannot be handed to a service:
/// those with no inputs at all, or with an input that carried no usable
/// value (see [`crate::codec::ModelInput::value`]). Returns a map from
/// request id to the code that entry's response record should carry;
/// entries absent from the map are good to dispatch.
///
/// This does not reject the whole predict call -- a batch with some invalid
/// entries still succeeds overall, with those entries' records reporting
/// their own failure code.
pub fn validate_predict_inputs(batch: &[RequestBatchEntry]) -> HashMap<String, ErrorCode> {
    let mut invalid = HashMap::new();
    for entry in batch {
        let bad = entry.inputs.is_empty() || entry.inputs.iter().any(|i| i.value.is_none());
        if bad {
            invalid.insert(entry.request_id.clone(), ErrorCode::UnknownContentType);
        }
    }
    invalid
}
