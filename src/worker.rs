//! Owns the listening socket, the single active client connection, and the
//! request/response state machine described in `SPEC_FULL.md` §4.6 (C7).
//!
//! The worker binds to a Unix domain socket, accepts exactly one client
//! connection, and then serves frames off it until one of: the client
//! disconnects cleanly, a fatal receive error occurs, consecutive send
//! failures exceed the configured threshold, or the process is otherwise
//! terminated. A peer disconnecting is terminal for the worker process
//! rather than a cue to accept a new client -- the originating system spawns
//! one worker process per dispatcher connection, so there is no "go back to
//! LISTENING for a second client" case to implement; see `DESIGN.md`.

use std::collections::HashMap;
use std::io::{self, Write};
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::FromRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use libc::{sa_family_t, sockaddr_un};

use worker_protocol::codec::{self, DecodedCommand, PredictionRecord, Value};
use worker_protocol::error::{ErrorCode, ProtocolError};
use worker_protocol::validate;
use worker_protocol::Result;

use crate::config::WorkerConfig;
use crate::loader;
use crate::service::ServiceManager;

/// Fixed text for the response message of a successful predict.
const PREDICT_SUCCESS_MESSAGE: &str = "Prediction success";
/// Fixed text substituted for a rejected request's value in a predict
/// response.
const INVALID_INPUT_MESSAGE: &str = "Invalid input provided";

/// The long-running worker process: one listening socket, one
/// [`ServiceManager`], and the send-failure counter the worker loop tracks
/// across every frame on the active connection.
pub struct Worker {
    listener: UnixListener,
    services: ServiceManager,
    config: WorkerConfig,
}

impl Worker {
    /// `INIT` / `BOUND` / `LISTENING`: unlink a stale socket path if present,
    /// create and bind a new Unix domain socket, and start listening with
    /// the configured backlog.
    pub fn bind(socket_path: impl AsRef<Path>, services: ServiceManager, config: WorkerConfig) -> Result<Self> {
        let listener = bind_listener(socket_path.as_ref(), config.backlog)?;
        Ok(Self {
            listener,
            services,
            config,
        })
    }

    /// Accept one client and serve it until the connection ends, returning
    /// the process exit code described in `SPEC_FULL.md` §6.
    pub fn run(mut self) -> i32 {
        tracing::info!("Waiting for a connection");
        let stream = match self.listener.accept() {
            Ok((stream, _addr)) => stream,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                return ErrorCode::UnknownException.as_i32();
            }
        };
        tracing::info!("accepted connection");
        self.handle_connection(stream)
    }

    /// `ACCEPTED` / `HANDLING` / `RESPONDING`: read frames off `stream` in a
    /// loop, dispatching each to the appropriate component and writing back
    /// exactly one response per frame, in order, before reading the next.
    fn handle_connection(&mut self, mut stream: UnixStream) -> i32 {
        let mut send_failures: u32 = 0;

        loop {
            let frame = match codec::read_frame(&mut stream, self.config.max_frame_size) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "receive error");
                    let resp = codec::encode_general_response(e.code().as_i32(), &e.message(), None);
                    if !self.send(&mut stream, &resp, &mut send_failures) {
                        return ErrorCode::SendFailsExceedsLimits.as_i32();
                    }
                    continue;
                }
            };

            if frame.is_empty() {
                tracing::info!("peer disconnected");
                return 1;
            }

            let (code, message, predictions) = self.dispatch(&frame);
            let resp = codec::encode_general_response(code, &message, predictions.as_deref());
            if !self.send(&mut stream, &resp, &mut send_failures) {
                return ErrorCode::SendFailsExceedsLimits.as_i32();
            }
        }
    }

    /// Write `bytes` to `stream`. Returns `false` when the caller should
    /// exit the worker (the send-failure threshold was just reached),
    /// `true` otherwise. A successful send resets the counter to zero.
    fn send(&self, stream: &mut UnixStream, bytes: &[u8], send_failures: &mut u32) -> bool {
        match stream.write_all(bytes) {
            Ok(()) => {
                *send_failures = 0;
                true
            }
            Err(e) => {
                *send_failures += 1;
                tracing::warn!(error = %e, failures = *send_failures, "send failed");
                *send_failures < self.config.send_failure_threshold
            }
        }
    }

    /// Decode and dispatch one frame, returning `(code, message,
    /// predictions)` ready for [`codec::encode_general_response`].
    fn dispatch(&mut self, frame: &[u8]) -> (i32, String, Option<Vec<u8>>) {
        match codec::decode(frame) {
            Ok((_, DecodedCommand::Load(raw))) => as_response(self.dispatch_load(raw)),
            Ok((_, DecodedCommand::Predict(raw))) => self.dispatch_predict(raw),
            Ok((_, DecodedCommand::Unload(raw))) => as_response(self.dispatch_unload(raw)),
            Ok((_, DecodedCommand::Unknown(cmd))) => as_response(Err(ProtocolError::UnknownCommand(cmd))),
            Err(e) => as_response(Err(e)),
        }
    }

    fn dispatch_load(&mut self, raw: worker_protocol::codec::RawLoad) -> Result<String> {
        let req = validate::validate_load_message(raw)?;
        let model_dir = PathBuf::from(&req.model_path);
        let (manifest, handler_path) = loader::load(&model_dir, Some(&req.handler))?;
        self.services.register_and_load(
            &req.model_name,
            &model_dir,
            manifest,
            handler_path.clone(),
            req.gpu_id,
            req.batch_size,
        )?;
        Ok(format!("loaded model {}", handler_path.display()))
    }

    fn dispatch_unload(&mut self, raw: worker_protocol::codec::RawUnload) -> Result<String> {
        let req = validate::validate_unload_msg(raw)?;
        self.services.unload(&req.model_name)?;
        Ok(format!("Unloaded model {}", req.model_name))
    }

    fn dispatch_predict(&mut self, raw: worker_protocol::codec::RawPredict) -> (i32, String, Option<Vec<u8>>) {
        let req = match validate::validate_predict_msg(raw) {
            Ok(req) => req,
            Err(e) => return as_response(Err(e)),
        };

        let declared_batch_size = match self.services.get_loaded(&req.model_name) {
            Ok(service) => service.batch_size,
            Err(e) => return as_response(Err(e)),
        };

        if let Err(e) = validate::validate_batch_size(&req.request_batch, declared_batch_size) {
            return as_response(Err(e));
        }

        let invalid = validate::validate_predict_inputs(&req.request_batch);
        let valid_batch: Vec<_> = req
            .request_batch
            .iter()
            .filter(|entry| !invalid.contains_key(&entry.request_id))
            .cloned()
            .collect();

        let mut results: HashMap<String, Value> =
            match self.services.inference(&req.model_name, &valid_batch) {
                Ok(pairs) => pairs.into_iter().collect(),
                Err(e) => return as_response(Err(e)),
            };

        self.services.emit_metrics(&req.model_name, &mut io::stdout());

        let records: Vec<PredictionRecord> = req
            .request_batch
            .iter()
            .map(|entry| {
                if let Some(code) = invalid.get(&entry.request_id) {
                    PredictionRecord {
                        request_id: entry.request_id.clone(),
                        code: code.as_i32(),
                        value: Value::Text(INVALID_INPUT_MESSAGE.to_string()),
                    }
                } else {
                    PredictionRecord {
                        request_id: entry.request_id.clone(),
                        code: ErrorCode::Success.as_i32(),
                        value: results
                            .remove(&entry.request_id)
                            .unwrap_or_else(|| Value::Text(String::new())),
                    }
                }
            })
            .collect();

        let predictions = codec::encode_predict_response(&records);
        (
            ErrorCode::Success.as_i32(),
            PREDICT_SUCCESS_MESSAGE.to_string(),
            Some(predictions),
        )
    }
}

fn as_response(result: Result<String>) -> (i32, String, Option<Vec<u8>>) {
    match result {
        Ok(message) => (ErrorCode::Success.as_i32(), message, None),
        Err(e) => (e.code().as_i32(), e.message(), None),
    }
}

/// Create, bind, and listen on a Unix domain socket at `path` with the given
/// backlog. `std::os::unix::net::UnixListener::bind` does not expose a
/// listen backlog, so this talks to `libc` directly -- the same pattern the
/// reference crate uses elsewhere for OS-level socket knobs std doesn't
/// surface.
fn bind_listener(path: &Path, backlog: i32) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .map_err(|_| ProtocolError::SocketError(path.display().to_string()))?;
    }

    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(ProtocolError::SocketCreateFailed(
            io::Error::last_os_error().to_string(),
        ));
    }

    let path_bytes = path.as_os_str().as_bytes();
    let max_path_len = mem::size_of::<sockaddr_un>() - mem::size_of::<sa_family_t>() - 1;
    if path_bytes.len() > max_path_len {
        unsafe { libc::close(fd) };
        return Err(ProtocolError::SocketCreateFailed(format!(
            "socket path too long: {}",
            path.display()
        )));
    }

    let mut addr: sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as sa_family_t;
    for (i, byte) in path_bytes.iter().enumerate() {
        addr.sun_path[i] = *byte as libc::c_char;
    }
    let addr_len = (mem::size_of::<sa_family_t>() + path_bytes.len() + 1) as libc::socklen_t;

    let bind_result = unsafe {
        libc::bind(
            fd,
            &addr as *const sockaddr_un as *const libc::sockaddr,
            addr_len,
        )
    };
    if bind_result != 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(ProtocolError::SocketBindError(err.to_string()));
    }

    let listen_result = unsafe { libc::listen(fd, backlog) };
    if listen_result != 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(ProtocolError::SocketBindError(err.to_string()));
    }

    Ok(unsafe { UnixListener::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerRegistry;
    use tempfile::tempdir;

    fn manager() -> ServiceManager {
        ServiceManager::new(HandlerRegistry::with_builtins())
    }

    #[test]
    fn bind_creates_a_listener_at_the_given_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.sock");
        let worker = Worker::bind(&path, manager(), WorkerConfig::default()).unwrap();
        assert!(path.exists());
        drop(worker);
    }

    #[test]
    fn bind_unlinks_a_stale_socket_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.sock");
        std::fs::write(&path, b"stale").unwrap();
        let worker = Worker::bind(&path, manager(), WorkerConfig::default());
        assert!(worker.is_ok());
    }

    #[test]
    fn unknown_command_dispatches_to_unknown_command_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.sock");
        let mut worker = Worker::bind(&path, manager(), WorkerConfig::default()).unwrap();

        let mut frame = Vec::new();
        frame.extend_from_slice(&1.0f64.to_be_bytes());
        frame.extend_from_slice(&99i32.to_be_bytes());

        let (code, _message, predictions) = worker.dispatch(&frame);
        assert_eq!(code, ErrorCode::UnknownCommand.as_i32());
        assert!(predictions.is_none());
    }

    #[test]
    fn predict_on_unloaded_model_is_model_service_not_loaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.sock");
        let mut worker = Worker::bind(&path, manager(), WorkerConfig::default()).unwrap();

        let req = worker_protocol::codec::PredictRequest {
            model_name: "foo".into(),
            request_batch: vec![worker_protocol::codec::RequestBatchEntry {
                request_id: "r1".into(),
                content_type: "application/json".into(),
                inputs: vec![],
            }],
        };
        let frame = worker_protocol::codec::encode_predict_request(&req);

        let (code, message, _) = worker.dispatch(&frame);
        assert_eq!(code, ErrorCode::ModelServiceNotLoaded.as_i32());
        assert_eq!(message, "Model foo is currently not loaded");
    }
}
