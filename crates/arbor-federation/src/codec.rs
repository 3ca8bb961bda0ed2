//! Wire format: one JSON object per line, tagged by `type`.
//!
//! ```text
//! {"type":"introduce","public_key":"<hex>","domain":"a.example"}
//! {"type":"challenge","nonce":"<hex>"}
//! {"type":"authenticate","signature":"<hex>"}
//! {"type":"command","command":"pool-post","params":{"username":"ana","pool_id":3}}
//! {"type":"reply","code":"NOT FOUND","message":"pool"}
//! ```

use crate::error::{FederationError, ProtocolError};
use arbor_types::ReplyCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Longest accepted frame, in bytes, excluding the newline.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Introduce {
        public_key: String,
        domain: String,
    },
    Challenge {
        nonce: String,
    },
    Authenticate {
        signature: String,
    },
    Command {
        command: String,
        #[serde(default)]
        params: Params,
    },
    Reply {
        code: ReplyCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Frame {
    pub fn command(command: impl Into<String>, params: Params) -> Self {
        Self::Command {
            command: command.into(),
            params,
        }
    }

    pub fn ok() -> Self {
        Self::Reply {
            code: ReplyCode::Ok,
            message: None,
        }
    }

    /// The reply frame reporting `err` to the peer.
    pub fn error_reply(err: &FederationError) -> Self {
        Self::Reply {
            code: err.reply_code(),
            message: err.reply_message(),
        }
    }

    /// Frame type label, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Introduce { .. } => "introduce",
            Self::Challenge { .. } => "challenge",
            Self::Authenticate { .. } => "authenticate",
            Self::Command { .. } => "command",
            Self::Reply { .. } => "reply",
        }
    }
}

/// Command parameters: a flat map of string or number values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// The value under `key` as text.
    ///
    /// Numbers are rendered in decimal. Absent, null and whitespace-only
    /// values all read as `None`; other strings are returned untouched.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The value under `key` as an integer, accepting numeric strings.
    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Rejects nested or boolean values.
    fn check_scalars(&self) -> Result<(), ProtocolError> {
        for (key, value) in &self.0 {
            if !matches!(value, Value::String(_) | Value::Number(_) | Value::Null) {
                return Err(ProtocolError::InvalidParameter { key: key.clone() });
            }
        }
        Ok(())
    }
}

/// Parses one line into a frame.
pub fn decode_frame(line: &str) -> Result<Frame, ProtocolError> {
    let frame: Frame = serde_json::from_str(line)?;
    if let Frame::Command { params, .. } = &frame {
        params.check_scalars()?;
    }
    Ok(frame)
}

/// Renders a frame as one line, without the trailing newline.
pub fn encode_frame(frame: &Frame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Newline-delimited JSON codec for [`Frame`]s.
///
/// A line that is not a valid frame decodes to `Some(Err(_))` so the
/// connection can answer it and keep reading. Only transport failures and
/// oversized lines end the stream.
#[derive(Debug)]
pub struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_FRAME_LEN),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn lines_error(err: LinesCodecError) -> ProtocolError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => ProtocolError::FrameTooLong(MAX_FRAME_LEN),
        LinesCodecError::Io(e) => ProtocolError::Io(e),
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Frame, ProtocolError>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.lines.decode(src).map_err(lines_error)? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(decode_frame(&line))),
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.lines.decode_eof(src).map_err(lines_error)? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(decode_frame(&line))),
                None => return Ok(None),
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = encode_frame(&frame)?;
        self.lines.encode(line, dst).map_err(lines_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_parses_mixed_params() {
        let frame = decode_frame(
            r#"{"type":"command","command":"pool-post","params":{"username":"ana","pool_id":3,"origin":" "}}"#,
        )
        .unwrap();
        let Frame::Command { command, params } = frame else {
            panic!("expected a command frame");
        };
        assert_eq!(command, "pool-post");
        assert_eq!(params.text("username").as_deref(), Some("ana"));
        assert_eq!(params.text("pool_id").as_deref(), Some("3"));
        assert_eq!(params.integer("pool_id"), Some(3));
        assert_eq!(params.text("origin"), None);
        assert_eq!(params.text("post_id"), None);
    }

    #[test]
    fn nested_param_values_are_rejected() {
        let err = decode_frame(
            r#"{"type":"command","command":"post","params":{"text":{"nested":true}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParameter { key } if key == "text"));
    }

    #[test]
    fn unknown_frame_type_is_malformed() {
        assert!(matches!(
            decode_frame(r#"{"type":"gossip"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(decode_frame("not json"), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn reply_omits_absent_message() {
        assert_eq!(
            encode_frame(&Frame::ok()).unwrap(),
            r#"{"type":"reply","code":"OK"}"#
        );
        let err = FederationError::NotFound("pool".into());
        assert_eq!(
            encode_frame(&Frame::error_reply(&err)).unwrap(),
            r#"{"type":"reply","code":"NOT FOUND","message":"pool"}"#
        );
    }

    #[test]
    fn codec_yields_bad_lines_without_ending_the_stream() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(
            "garbage\n\n{\"type\":\"authenticate\",\"signature\":\"ab\"}\n{\"type\":",
        );

        assert!(matches!(codec.decode(&mut buf), Ok(Some(Err(_)))));
        let frame = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Authenticate {
                signature: "ab".into()
            }
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn codec_rejects_oversized_lines() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("x".repeat(MAX_FRAME_LEN + 1).as_str());
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLong(_))
        ));
    }

    #[test]
    fn encoder_appends_newline() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Frame::Challenge {
                    nonce: "00".into(),
                },
                &mut buf,
            )
            .unwrap();
        assert_eq!(&buf[..], b"{\"type\":\"challenge\",\"nonce\":\"00\"}\n");
    }
}
