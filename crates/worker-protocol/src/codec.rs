//! The OTF (on-the-fly) binary wire format, plus the legacy text/JSON framing
//! used only for the unload command.
//!
//! A binary frame is:
//!
//! ```text
//! version:f64(be) cmd:i32(be) <cmd-specific fields>
//! ```
//!
//! Every string and byte blob on the wire is length-prefixed by a big-endian
//! `i32`; lists are delimited by a leading `-1` (start) and trailing `-2`
//! (end) sentinel rather than a count, so a reader never needs to know how
//! many entries are coming before it starts reading them.
//!
//! [`decode`] is a pure function over an already-assembled buffer: give it
//! bytes, get back a parsed command or a [`ProtocolError`]. [`read_frame`]
//! does the complementary job of walking a live stream and assembling
//! exactly the bytes one call to `decode` needs, without over- or
//! under-reading past the frame boundary.

use crate::error::ProtocolError;
use crate::Result;
use std::io::Read;

/// The only protocol version this crate understands.
pub const VERSION: f64 = 1.0;

/// Command tag for a load request.
pub const CMD_LOAD: i32 = 1;
/// Command tag for a predict request.
pub const CMD_PREDICT: i32 = 2;

const START_OF_LIST: i32 = -1;
const END_OF_LIST: i32 = -2;

/// A fully validated load request, as produced by
/// [`crate::validate::validate_load_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub model_name: String,
    pub model_path: String,
    pub batch_size: i32,
    pub handler: String,
    pub gpu_id: i32,
}

/// One input tensor/blob attached to a predict request entry.
///
/// `value` is `None` when the wire supplied a zero-length value -- this is
/// legal framing (see the request-batch grammar) but is treated by
/// [`crate::validate::validate_predict_inputs`] as an invalid input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInput {
    pub name: String,
    pub content_type: String,
    pub value: Option<Vec<u8>>,
}

/// One request within a predict command's batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBatchEntry {
    pub request_id: String,
    pub content_type: String,
    pub inputs: Vec<ModelInput>,
}

/// A fully validated predict request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictRequest {
    pub model_name: String,
    pub request_batch: Vec<RequestBatchEntry>,
}

/// A fully validated unload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadRequest {
    pub model_name: String,
}

/// A load payload as decoded straight off the wire, before validation.
///
/// All fields are structurally present in a binary frame (the grammar has no
/// room for a missing field), so decode never leaves one of these `None`;
/// `Option` exists so the legacy JSON path can represent an absent key the
/// same way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLoad {
    pub model_name: Option<String>,
    pub model_path: Option<String>,
    pub batch_size: Option<i32>,
    pub handler: Option<String>,
    pub gpu_id: Option<i32>,
}

/// A predict payload as decoded straight off the wire, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPredict {
    pub model_name: Option<String>,
    pub request_batch: Option<Vec<RequestBatchEntry>>,
}

/// An unload payload as decoded straight off the wire, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawUnload {
    pub model_name: Option<String>,
}

/// A decoded-but-not-yet-validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedCommand {
    Load(RawLoad),
    Predict(RawPredict),
    Unload(RawUnload),
    Unknown(i32),
}

/// The encoding tag attached to a prediction value on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Binary(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    fn encoding(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Binary(_) => "binary",
            Value::Json(_) => "json",
        }
    }
}

/// One record in a predict response: a request id paired with its outcome.
///
/// Used uniformly for both successful and invalid entries -- see
/// `SPEC_FULL.md` §9 for why this crate does not reproduce the upstream
/// encoder's divergent shape for error records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionRecord {
    pub request_id: String,
    pub code: i32,
    pub value: Value,
}

// --- pure decode -----------------------------------------------------------

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn read_i32(&mut self) -> Result<i32> {
        if self.offset + 4 > self.data.len() {
            return Err(ProtocolError::InvalidMessage);
        }
        let v = i32::from_be_bytes(self.data[self.offset..self.offset + 4].try_into().unwrap());
        self.offset += 4;
        Ok(v)
    }

    fn read_f64(&mut self) -> Result<f64> {
        if self.offset + 8 > self.data.len() {
            return Err(ProtocolError::InvalidMessage);
        }
        let v = f64::from_be_bytes(self.data[self.offset..self.offset + 8].try_into().unwrap());
        self.offset += 8;
        Ok(v)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.offset + len > self.data.len() {
            return Err(ProtocolError::InvalidMessage);
        }
        let s = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(s)
    }

    fn read_lp_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len > 0 {
            let bytes = self.read_bytes(len as usize)?;
            String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidMessage)
        } else {
            Ok(String::new())
        }
    }
}

/// Parse a complete frame buffer into a tagged, not-yet-validated command.
///
/// A leading `{` routes to the legacy JSON path (unload only); anything else
/// is parsed as a binary frame. Returns the command's name (`"load"`,
/// `"predict"`, `"unload"`, or `"unknown"`) alongside the decoded payload.
pub fn decode(buf: &[u8]) -> Result<(&'static str, DecodedCommand)> {
    if buf.is_empty() {
        return Err(ProtocolError::InvalidMessage);
    }
    if buf[0] == b'{' {
        return decode_json(buf);
    }
    let mut c = Cursor::new(buf);
    let version = c.read_f64()?;
    let cmd = c.read_i32()?;
    if version != VERSION {
        return Err(ProtocolError::InvalidMessage);
    }
    match cmd {
        CMD_LOAD => Ok(("load", DecodedCommand::Load(decode_load(&mut c)?))),
        CMD_PREDICT => Ok(("predict", DecodedCommand::Predict(decode_predict(&mut c)?))),
        other => Ok(("unknown", DecodedCommand::Unknown(other))),
    }
}

fn decode_load(c: &mut Cursor) -> Result<RawLoad> {
    let model_name = c.read_lp_string()?;
    let model_path = c.read_lp_string()?;
    let batch_size = c.read_i32()?;
    let handler = c.read_lp_string()?;
    let gpu_id = c.read_i32()?;
    Ok(RawLoad {
        model_name: Some(model_name),
        model_path: Some(model_path),
        batch_size: Some(batch_size),
        handler: Some(handler),
        gpu_id: Some(gpu_id),
    })
}

fn decode_predict(c: &mut Cursor) -> Result<RawPredict> {
    let model_name = c.read_lp_string()?;
    let marker = c.read_i32()?;
    let request_batch = if marker == START_OF_LIST {
        Some(decode_request_batch(c)?)
    } else {
        None
    };
    Ok(RawPredict {
        model_name: Some(model_name),
        request_batch,
    })
}

fn decode_request_batch(c: &mut Cursor) -> Result<Vec<RequestBatchEntry>> {
    let mut out = Vec::new();
    loop {
        let len = c.read_i32()?;
        if len == END_OF_LIST {
            break;
        }
        let request_id = if len > 0 {
            String::from_utf8(c.read_bytes(len as usize)?.to_vec())
                .map_err(|_| ProtocolError::InvalidMessage)?
        } else {
            String::new()
        };
        let content_type = c.read_lp_string()?;
        let marker = c.read_i32()?;
        let inputs = if marker == START_OF_LIST {
            decode_model_inputs(c, &content_type)?
        } else {
            Vec::new()
        };
        out.push(RequestBatchEntry {
            request_id,
            content_type,
            inputs,
        });
    }
    Ok(out)
}

fn decode_model_inputs(c: &mut Cursor, outer_content_type: &str) -> Result<Vec<ModelInput>> {
    let mut out = Vec::new();
    loop {
        let len = c.read_i32()?;
        if len == END_OF_LIST {
            break;
        }
        let name = if len > 0 {
            String::from_utf8(c.read_bytes(len as usize)?.to_vec())
                .map_err(|_| ProtocolError::InvalidMessage)?
        } else {
            String::new()
        };
        let content_type = c.read_lp_string()?;
        let value_len = c.read_i32()?;
        let value = if value_len > 0 {
            let effective_ct = if !content_type.is_empty() {
                content_type.as_str()
            } else {
                outer_content_type
            };
            let lower = effective_ct.to_ascii_lowercase();
            let raw = c.read_bytes(value_len as usize)?.to_vec();
            if lower.contains("json") || lower.contains("jpeg") {
                Some(raw)
            } else {
                return Err(ProtocolError::UnknownContentType);
            }
        } else {
            None
        };
        out.push(ModelInput {
            name,
            content_type,
            value,
        });
    }
    Ok(out)
}

fn decode_json(buf: &[u8]) -> Result<(&'static str, DecodedCommand)> {
    let text = std::str::from_utf8(buf).map_err(|_| ProtocolError::InvalidMessage)?;
    let trimmed = text.trim_end_matches(['\r', '\n']);
    let parsed: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|_| ProtocolError::InvalidMessage)?;
    let command = parsed
        .get("command")
        .and_then(|v| v.as_str())
        .ok_or(ProtocolError::InvalidMessage)?;
    match command {
        "unload" => {
            let model_name = parsed
                .get("model-name")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            Ok(("unload", DecodedCommand::Unload(RawUnload { model_name })))
        }
        _ => Err(ProtocolError::InvalidMessage),
    }
}

/// Parse a predict response buffer back into its records. Exists for tests
/// and tooling that need to verify a response this crate encoded.
pub fn decode_predict_response(buf: &[u8]) -> Result<Vec<PredictionRecord>> {
    let mut c = Cursor::new(buf);
    let marker = c.read_i32()?;
    if marker != START_OF_LIST {
        return Err(ProtocolError::CodecFail(
            "predict response missing start-of-list marker".into(),
        ));
    }
    let mut out = Vec::new();
    loop {
        let len = c.read_i32()?;
        if len == END_OF_LIST {
            break;
        }
        let request_id = if len > 0 {
            String::from_utf8(c.read_bytes(len as usize)?.to_vec())
                .map_err(|_| ProtocolError::CodecFail("request id is not valid utf8".into()))?
        } else {
            String::new()
        };
        let code = c.read_i32()?;
        let encoding = c.read_lp_string()?;
        let value_len = c.read_i32()?;
        let raw = if value_len > 0 {
            c.read_bytes(value_len as usize)?.to_vec()
        } else {
            Vec::new()
        };
        let value = match encoding.as_str() {
            "text" => Value::Text(
                String::from_utf8(raw)
                    .map_err(|_| ProtocolError::CodecFail("text value is not valid utf8".into()))?,
            ),
            "binary" => Value::Binary(raw),
            "json" => Value::Json(
                serde_json::from_slice(&raw).map_err(|e| ProtocolError::CodecFail(e.to_string()))?,
            ),
            other => {
                return Err(ProtocolError::CodecFail(format!(
                    "unknown prediction encoding '{other}'"
                )))
            }
        };
        out.push(PredictionRecord {
            request_id,
            code,
            value,
        });
    }
    Ok(out)
}

// --- encode ------------------------------------------------------------

fn write_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_lp_str(buf: &mut Vec<u8>, s: &str) {
    write_i32(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}

fn write_lp_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    write_i32(buf, b.len() as i32);
    buf.extend_from_slice(b);
}

/// Encode a load request frame, as a client would send it. Used by tests and
/// by any harness driving the worker as a black box.
pub fn encode_load_request(req: &LoadRequest) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&VERSION.to_be_bytes());
    write_i32(&mut buf, CMD_LOAD);
    write_lp_str(&mut buf, &req.model_name);
    write_lp_str(&mut buf, &req.model_path);
    write_i32(&mut buf, req.batch_size);
    write_lp_str(&mut buf, &req.handler);
    write_i32(&mut buf, req.gpu_id);
    buf
}

/// Encode a predict request frame, as a client would send it.
pub fn encode_predict_request(req: &PredictRequest) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&VERSION.to_be_bytes());
    write_i32(&mut buf, CMD_PREDICT);
    write_lp_str(&mut buf, &req.model_name);
    write_i32(&mut buf, START_OF_LIST);
    for entry in &req.request_batch {
        write_lp_str(&mut buf, &entry.request_id);
        write_lp_str(&mut buf, &entry.content_type);
        write_i32(&mut buf, START_OF_LIST);
        for input in &entry.inputs {
            write_lp_str(&mut buf, &input.name);
            write_lp_str(&mut buf, &input.content_type);
            match &input.value {
                Some(v) => write_lp_bytes(&mut buf, v),
                None => write_i32(&mut buf, 0),
            }
        }
        write_i32(&mut buf, END_OF_LIST);
    }
    write_i32(&mut buf, END_OF_LIST);
    buf
}

/// Encode an unload request using the legacy CRLF-terminated JSON framing --
/// the only framing the wire grammar defines for this command.
pub fn encode_unload_request(req: &UnloadRequest) -> Vec<u8> {
    let obj = serde_json::json!({
        "command": "unload",
        "model-name": req.model_name,
    });
    let mut buf = serde_json::to_vec(&obj).expect("json object always serializes");
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Encode a predict response: a `-1`/`-2`-delimited list of
/// `requestId | code | encoding | value` records.
pub fn encode_predict_response(records: &[PredictionRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_i32(&mut buf, START_OF_LIST);
    for r in records {
        write_lp_str(&mut buf, &r.request_id);
        write_i32(&mut buf, r.code);
        write_lp_str(&mut buf, r.value.encoding());
        match &r.value {
            Value::Text(s) => write_lp_str(&mut buf, s),
            Value::Binary(b) => write_lp_bytes(&mut buf, b),
            Value::Json(v) => {
                let s = serde_json::to_vec(v).unwrap_or_default();
                write_lp_bytes(&mut buf, &s);
            }
        }
    }
    write_i32(&mut buf, END_OF_LIST);
    buf
}

/// Encode a general (non-predict) response: `version | code | message |
/// predictions-or-zero | "\r\n"`. `predictions`, when present, must already
/// be a frame produced by [`encode_predict_response`].
pub fn encode_general_response(code: i32, message: &str, predictions: Option<&[u8]>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&VERSION.to_be_bytes());
    write_i32(&mut buf, code);
    write_lp_str(&mut buf, message);
    match predictions {
        Some(p) => buf.extend_from_slice(p),
        None => write_i32(&mut buf, 0),
    }
    buf.extend_from_slice(b"\r\n");
    buf
}

// --- stream framing ------------------------------------------------------

fn io_err(e: std::io::Error) -> ProtocolError {
    ProtocolError::ReceiveError(e.to_string())
}

/// Default cap passed to [`read_frame`] by callers that don't have a
/// configured limit handy (tests, tooling). Matches
/// `crate::config::WorkerConfig`'s own default so a standalone call behaves
/// the same as the worker loop.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

fn check_len(len: usize, buf: &[u8], max_frame_size: usize) -> Result<()> {
    if buf.len() + len > max_frame_size {
        return Err(ProtocolError::InvalidMessage);
    }
    Ok(())
}

fn read_i32_field<R: Read>(stream: &mut R, buf: &mut Vec<u8>) -> Result<i32> {
    let mut tmp = [0u8; 4];
    stream.read_exact(&mut tmp).map_err(io_err)?;
    buf.extend_from_slice(&tmp);
    Ok(i32::from_be_bytes(tmp))
}

fn read_lp_field<R: Read>(stream: &mut R, buf: &mut Vec<u8>, max_frame_size: usize) -> Result<i32> {
    let len = read_i32_field(stream, buf)?;
    if len > 0 {
        check_len(len as usize, buf, max_frame_size)?;
        let mut data = vec![0u8; len as usize];
        stream.read_exact(&mut data).map_err(io_err)?;
        buf.extend_from_slice(&data);
    }
    Ok(len)
}

/// Read exactly one frame off `stream` and return the raw bytes, ready to
/// hand to [`decode`]. Returns an empty vector when the peer closed the
/// connection cleanly before sending a single byte; callers use that to
/// distinguish "no more requests" from a mid-frame disconnect (which
/// surfaces as a `ReceiveError` instead). `max_frame_size` bounds both the
/// binary grammar's length-prefixed fields and the legacy JSON framing's
/// scan for its `\r\n` terminator, guarding against a misbehaving or
/// malicious dispatcher streaming an unbounded field.
pub fn read_frame<R: Read>(stream: &mut R, max_frame_size: usize) -> Result<Vec<u8>> {
    let mut first = [0u8; 1];
    let n = stream.read(&mut first).map_err(io_err)?;
    if n == 0 {
        return Ok(Vec::new());
    }
    if first[0] == b'{' {
        read_json_frame(stream, first[0], max_frame_size)
    } else {
        read_binary_frame(stream, first[0], max_frame_size)
    }
}

fn read_binary_frame<R: Read>(stream: &mut R, first_byte: u8, max_frame_size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    buf.push(first_byte);
    let mut rest_of_version = [0u8; 7];
    stream.read_exact(&mut rest_of_version).map_err(io_err)?;
    buf.extend_from_slice(&rest_of_version);
    let cmd = read_i32_field(stream, &mut buf)?;
    match cmd {
        CMD_LOAD => read_load_fields(stream, &mut buf, max_frame_size)?,
        CMD_PREDICT => read_predict_fields(stream, &mut buf, max_frame_size)?,
        _ => {}
    }
    Ok(buf)
}

fn read_load_fields<R: Read>(stream: &mut R, buf: &mut Vec<u8>, max_frame_size: usize) -> Result<()> {
    read_lp_field(stream, buf, max_frame_size)?; // modelName
    read_lp_field(stream, buf, max_frame_size)?; // modelPath
    read_i32_field(stream, buf)?; // batchSize
    read_lp_field(stream, buf, max_frame_size)?; // handler
    read_i32_field(stream, buf)?; // gpuId
    Ok(())
}

fn read_predict_fields<R: Read>(stream: &mut R, buf: &mut Vec<u8>, max_frame_size: usize) -> Result<()> {
    read_lp_field(stream, buf, max_frame_size)?; // modelName
    let marker = read_i32_field(stream, buf)?;
    if marker == START_OF_LIST {
        read_request_batch_fields(stream, buf, max_frame_size)?;
    }
    Ok(())
}

fn read_request_batch_fields<R: Read>(stream: &mut R, buf: &mut Vec<u8>, max_frame_size: usize) -> Result<()> {
    loop {
        let len = read_i32_field(stream, buf)?;
        if len == END_OF_LIST {
            break;
        }
        if len > 0 {
            check_len(len as usize, buf, max_frame_size)?;
            let mut data = vec![0u8; len as usize];
            stream.read_exact(&mut data).map_err(io_err)?;
            buf.extend_from_slice(&data);
        }
        read_lp_field(stream, buf, max_frame_size)?; // contentType
        let marker = read_i32_field(stream, buf)?;
        if marker == START_OF_LIST {
            read_model_inputs_fields(stream, buf, max_frame_size)?;
        }
    }
    Ok(())
}

fn read_model_inputs_fields<R: Read>(stream: &mut R, buf: &mut Vec<u8>, max_frame_size: usize) -> Result<()> {
    loop {
        let len = read_i32_field(stream, buf)?;
        if len == END_OF_LIST {
            break;
        }
        if len > 0 {
            check_len(len as usize, buf, max_frame_size)?;
            let mut data = vec![0u8; len as usize];
            stream.read_exact(&mut data).map_err(io_err)?;
            buf.extend_from_slice(&data);
        }
        read_lp_field(stream, buf, max_frame_size)?; // contentType
        read_lp_field(stream, buf, max_frame_size)?; // value
    }
    Ok(())
}

fn read_json_frame<R: Read>(stream: &mut R, first_byte: u8, max_frame_size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![first_byte];
    let mut byte = [0u8; 1];
    loop {
        if buf.len() >= max_frame_size {
            return Err(ProtocolError::InvalidMessage);
        }
        let n = stream.read(&mut byte).map_err(io_err)?;
        if n == 0 {
            return Err(ProtocolError::ReceiveError(
                "connection closed mid-frame".into(),
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor as IoCursor;

    fn sample_load() -> LoadRequest {
        LoadRequest {
            model_name: "resnet".into(),
            model_path: "/models/resnet".into(),
            batch_size: 4,
            handler: "resnet.py".into(),
            gpu_id: -1,
        }
    }

    fn sample_predict() -> PredictRequest {
        PredictRequest {
            model_name: "resnet".into(),
            request_batch: vec![RequestBatchEntry {
                request_id: "req-1".into(),
                content_type: "application/json".into(),
                inputs: vec![ModelInput {
                    name: "body".into(),
                    content_type: "application/json".into(),
                    value: Some(b"{\"x\":1}".to_vec()),
                }],
            }],
        }
    }

    #[test]
    fn load_request_round_trips_through_decode() {
        let req = sample_load();
        let frame = encode_load_request(&req);
        let (tag, cmd) = decode(&frame).unwrap();
        assert_eq!(tag, "load");
        match cmd {
            DecodedCommand::Load(raw) => {
                assert_eq!(raw.model_name.as_deref(), Some("resnet"));
                assert_eq!(raw.model_path.as_deref(), Some("/models/resnet"));
                assert_eq!(raw.batch_size, Some(4));
                assert_eq!(raw.handler.as_deref(), Some("resnet.py"));
                assert_eq!(raw.gpu_id, Some(-1));
            }
            other => panic!("expected Load, got {other:?}"),
        }
    }

    #[test]
    fn predict_request_round_trips_through_decode() {
        let req = sample_predict();
        let frame = encode_predict_request(&req);
        let (tag, cmd) = decode(&frame).unwrap();
        assert_eq!(tag, "predict");
        match cmd {
            DecodedCommand::Predict(raw) => {
                assert_eq!(raw.model_name.as_deref(), Some("resnet"));
                let batch = raw.request_batch.unwrap();
                assert_eq!(batch.len(), 1);
                assert_eq!(batch[0].request_id, "req-1");
                assert_eq!(batch[0].inputs.len(), 1);
                assert_eq!(batch[0].inputs[0].value.as_deref(), Some(&b"{\"x\":1}"[..]));
            }
            other => panic!("expected Predict, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_version_is_invalid_message() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2.0f64.to_be_bytes());
        write_i32(&mut buf, CMD_LOAD);
        write_lp_str(&mut buf, "x");
        write_lp_str(&mut buf, "y");
        write_i32(&mut buf, 1);
        write_lp_str(&mut buf, "h.py");
        write_i32(&mut buf, -1);
        let err = decode(&buf).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidMessage);
    }

    #[test]
    fn unknown_command_tag_is_reported_but_not_an_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&VERSION.to_be_bytes());
        write_i32(&mut buf, 99);
        let (tag, cmd) = decode(&buf).unwrap();
        assert_eq!(tag, "unknown");
        assert_eq!(cmd, DecodedCommand::Unknown(99));
    }

    #[test]
    fn unload_uses_legacy_json_framing() {
        let req = UnloadRequest {
            model_name: "resnet".into(),
        };
        let frame = encode_unload_request(&req);
        assert!(frame.starts_with(b"{"));
        let (tag, cmd) = decode(&frame).unwrap();
        assert_eq!(tag, "unload");
        match cmd {
            DecodedCommand::Unload(raw) => assert_eq!(raw.model_name.as_deref(), Some("resnet")),
            other => panic!("expected Unload, got {other:?}"),
        }
    }

    #[test]
    fn predict_response_round_trips() {
        let records = vec![
            PredictionRecord {
                request_id: "req-1".into(),
                code: 200,
                value: Value::Json(serde_json::json!({"label": "cat"})),
            },
            PredictionRecord {
                request_id: "req-2".into(),
                code: 414,
                value: Value::Text("Invalid input provided".into()),
            },
        ];
        let frame = encode_predict_response(&records);
        let decoded = decode_predict_response(&frame).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn general_response_frame_is_self_delimiting() {
        let frame = encode_general_response(200, "loaded", None);
        assert!(frame.ends_with(b"\r\n"));
        let mut c = Cursor::new(&frame);
        assert_eq!(c.read_f64().unwrap(), VERSION);
        assert_eq!(c.read_i32().unwrap(), 200);
        assert_eq!(c.read_lp_string().unwrap(), "loaded");
        assert_eq!(c.read_i32().unwrap(), 0);
    }

    #[test]
    fn read_frame_assembles_exactly_one_binary_frame_from_a_stream() {
        let req = sample_load();
        let mut frame = encode_load_request(&req);
        frame.extend_from_slice(b"garbage-trailing-bytes");
        let mut stream = IoCursor::new(frame.clone());
        let assembled = read_frame(&mut stream, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(assembled, &frame[..assembled.len()]);
        decode(&assembled).unwrap();
    }

    #[test]
    fn read_frame_assembles_predict_frame_with_nested_lists() {
        let req = sample_predict();
        let frame = encode_predict_request(&req);
        let mut stream = IoCursor::new(frame.clone());
        let assembled = read_frame(&mut stream, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(assembled, frame);
    }

    #[test]
    fn read_frame_returns_empty_on_clean_close() {
        let mut stream = IoCursor::new(Vec::<u8>::new());
        let assembled = read_frame(&mut stream, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert!(assembled.is_empty());
    }

    #[test]
    fn read_frame_errors_on_close_mid_frame() {
        let mut stream = IoCursor::new(vec![0x3fu8, 0xf0]); // truncated version double
        let err = read_frame(&mut stream, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, ProtocolError::ReceiveError(_)));
    }

    #[test]
    fn missing_value_decodes_to_none_not_an_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&VERSION.to_be_bytes());
        write_i32(&mut buf, CMD_PREDICT);
        write_lp_str(&mut buf, "resnet");
        write_i32(&mut buf, START_OF_LIST);
        write_lp_str(&mut buf, "req-1");
        write_lp_str(&mut buf, "application/json");
        write_i32(&mut buf, START_OF_LIST);
        write_lp_str(&mut buf, "body");
        write_lp_str(&mut buf, "application/json");
        write_i32(&mut buf, 0); // zero-length value
        write_i32(&mut buf, END_OF_LIST);
        write_i32(&mut buf, END_OF_LIST);

        let (_, cmd) = decode(&buf).unwrap();
        match cmd {
            DecodedCommand::Predict(raw) => {
                let batch = raw.request_batch.unwrap();
                assert_eq!(batch[0].inputs[0].value, None);
            }
            other => panic!("expected Predict, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_content_type_with_a_value_is_unknown_content_type() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&VERSION.to_be_bytes());
        write_i32(&mut buf, CMD_PREDICT);
        write_lp_str(&mut buf, "resnet");
        write_i32(&mut buf, START_OF_LIST);
        write_lp_str(&mut buf, "req-1");
        write_lp_str(&mut buf, "application/octet-stream");
        write_i32(&mut buf, START_OF_LIST);
        write_lp_str(&mut buf, "body");
        write_lp_str(&mut buf, "application/octet-stream");
        write_lp_bytes(&mut buf, b"\x00\x01");
        write_i32(&mut buf, END_OF_LIST);
        write_i32(&mut buf, END_OF_LIST);

        let err = decode(&buf).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownContentType);
    }

    #[test]
    fn read_frame_rejects_a_length_field_exceeding_the_configured_cap() {
        let req = sample_load();
        let frame = encode_load_request(&req);
        let mut stream = IoCursor::new(frame);
        let err = read_frame(&mut stream, 4).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidMessage);
    }

    #[test]
    fn read_json_frame_rejects_an_unterminated_line_past_the_cap() {
        let mut data = vec![b'{'];
        data.extend(std::iter::repeat(b'x').take(64));
        let mut stream = IoCursor::new(data);
        let err = read_frame(&mut stream, 8).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidMessage);
    }
}
