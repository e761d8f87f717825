//! Frame parser
//!
//! Groups consecutive lines into [`ClientMessage`] frames. The header line
//! selects the frame kind; every following line must carry the next
//! expected `KEY:` in order.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::error::ProtocolError;
use crate::message::ClientMessage;
use crate::types::{ClientId, RoomRef};

/// Maximum accepted line length in bytes
pub const MAX_LINE_LENGTH: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Join,
    Leave,
    Chat,
    Disconnect,
}

impl FrameKind {
    fn name(self) -> &'static str {
        match self {
            FrameKind::Join => "JOIN_CHATROOM",
            FrameKind::Leave => "LEAVE_CHATROOM",
            FrameKind::Chat => "CHAT",
            FrameKind::Disconnect => "DISCONNECT",
        }
    }

    /// Keys of the lines after the header; None accepts any line
    fn fields(self) -> &'static [Option<&'static str>] {
        match self {
            FrameKind::Join => &[Some("CLIENT_IP"), Some("PORT"), Some("CLIENT_NAME")],
            FrameKind::Leave => &[Some("JOIN_ID"), Some("CLIENT_NAME")],
            FrameKind::Chat => &[Some("JOIN_ID"), Some("CLIENT_NAME"), Some("MESSAGE")],
            FrameKind::Disconnect => &[None, Some("CLIENT_NAME")],
        }
    }
}

/// Start of a frame as recognised from its first line
enum Header {
    Complete(ClientMessage),
    Begin(FrameKind, String),
}

fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key)?.strip_prefix(':').map(str::trim)
}

/// Chat text keeps its own whitespace; only the separator space goes
fn message_value(line: &str) -> Option<&str> {
    let value = line.strip_prefix("MESSAGE:")?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

fn parse_header(line: &str) -> Option<Header> {
    if line.trim() == "KILL_SERVICE" {
        return Some(Header::Complete(ClientMessage::Kill));
    }
    if let Some(payload) = line.strip_prefix("HELO ") {
        return Some(Header::Complete(ClientMessage::Hello {
            payload: payload.trim_end().to_string(),
        }));
    }
    [
        FrameKind::Join,
        FrameKind::Leave,
        FrameKind::Chat,
        FrameKind::Disconnect,
    ]
    .into_iter()
    .find_map(|kind| {
        field_value(line, kind.name()).map(|value| Header::Begin(kind, value.to_string()))
    })
}

fn parse_number(field: &'static str, value: &str) -> Result<u64, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

#[derive(Debug)]
struct Partial {
    kind: FrameKind,
    values: Vec<String>,
}

impl Partial {
    fn is_complete(&self) -> bool {
        self.values.len() == self.kind.fields().len() + 1
    }

    fn build(self) -> Result<ClientMessage, ProtocolError> {
        let mut values = self.values.into_iter();
        let mut next = || values.next().unwrap_or_default();
        match self.kind {
            FrameKind::Join => Ok(ClientMessage::Join {
                room_name: next(),
                client_ip: next(),
                port: next(),
                client_name: next(),
            }),
            FrameKind::Leave => Ok(ClientMessage::Leave {
                room_ref: RoomRef(parse_number("LEAVE_CHATROOM", &next())?),
                join_id: ClientId(parse_number("JOIN_ID", &next())?),
                client_name: next(),
            }),
            FrameKind::Chat => Ok(ClientMessage::Chat {
                room_ref: RoomRef(parse_number("CHAT", &next())?),
                join_id: ClientId(parse_number("JOIN_ID", &next())?),
                client_name: next(),
                message: next(),
            }),
            FrameKind::Disconnect => {
                let reason = next();
                let _ = next();
                Ok(ClientMessage::Disconnect {
                    reason,
                    client_name: next(),
                })
            }
        }
    }
}

/// Line decoder for client input
///
/// Wraps [`LinesCodec`] so that an oversized or non-UTF-8 line comes out
/// as a [`ProtocolError`] item instead of ending the stream. The codec
/// skips the rest of an oversized line on its own.
#[derive(Debug)]
pub struct LineDecoder {
    lines: LinesCodec,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }

    fn recover(
        result: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Result<String, ProtocolError>>, LinesCodecError> {
        match result {
            Ok(line) => Ok(line.map(Ok)),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Ok(Some(Err(ProtocolError::LineTooLong(MAX_LINE_LENGTH))))
            }
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Err(ProtocolError::InvalidUtf8)))
            }
            Err(e) => Err(e),
        }
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineDecoder {
    type Item = Result<String, ProtocolError>;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Self::recover(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Self::recover(self.lines.decode_eof(buf))
    }
}

/// Incremental line-to-frame parser, one per session
#[derive(Debug, Default)]
pub struct FrameParser {
    pending: Option<Partial>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any partially received frame
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Whether a multi-line frame is partially received
    pub fn is_mid_frame(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one line (without its terminator)
    ///
    /// Returns the frames completed by this line. A rejected frame is
    /// reported as an error and discarded; if the offending line is itself
    /// a header, a new frame starts from it.
    pub fn push(&mut self, line: &str) -> Vec<Result<ClientMessage, ProtocolError>> {
        let line = line.trim_end_matches('\r');
        let mut out = Vec::new();

        if let Some(mut partial) = self.pending.take() {
            let expected = partial.kind.fields()[partial.values.len() - 1];
            let value = match expected {
                Some("MESSAGE") => message_value(line),
                Some(key) => field_value(line, key),
                None => Some(line.trim()),
            };
            match value {
                Some(value) => {
                    partial.values.push(value.to_string());
                    if partial.is_complete() {
                        out.push(partial.build());
                    } else {
                        self.pending = Some(partial);
                    }
                    return out;
                }
                None => out.push(Err(ProtocolError::MissingField {
                    frame: partial.kind.name(),
                    field: expected.unwrap_or("line"),
                    line: line.to_string(),
                })),
            }
        }

        if line.trim().is_empty() {
            return out;
        }
        match parse_header(line) {
            Some(Header::Complete(msg)) => out.push(Ok(msg)),
            Some(Header::Begin(kind, value)) => {
                self.pending = Some(Partial {
                    kind,
                    values: vec![value],
                });
            }
            None if out.is_empty() => out.push(Err(ProtocolError::UnknownFrame(line.to_string()))),
            None => {}
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut FrameParser, text: &str) -> Vec<Result<ClientMessage, ProtocolError>> {
        text.lines().flat_map(|line| parser.push(line)).collect()
    }

    #[test]
    fn test_hello_and_kill() {
        let mut parser = FrameParser::new();
        assert_eq!(
            parser.push("HELO text"),
            vec![Ok(ClientMessage::Hello {
                payload: "text".to_string()
            })]
        );
        assert_eq!(parser.push("KILL_SERVICE\r"), vec![Ok(ClientMessage::Kill)]);
    }

    #[test]
    fn test_join_frame() {
        let mut parser = FrameParser::new();
        let frames = feed(
            &mut parser,
            "JOIN_CHATROOM: general\nCLIENT_IP: 0\nPORT: 0\nCLIENT_NAME: alice\n",
        );
        assert_eq!(
            frames,
            vec![Ok(ClientMessage::Join {
                room_name: "general".to_string(),
                client_ip: "0".to_string(),
                port: "0".to_string(),
                client_name: "alice".to_string(),
            })]
        );
        assert!(!parser.is_mid_frame());
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut parser = FrameParser::new();
        assert!(parser.push("LEAVE_CHATROOM: 3").is_empty());
        assert!(parser.is_mid_frame());
        assert!(parser.push("JOIN_ID: 7").is_empty());
        assert_eq!(
            parser.push("CLIENT_NAME: bob"),
            vec![Ok(ClientMessage::Leave {
                room_ref: RoomRef(3),
                join_id: ClientId(7),
                client_name: "bob".to_string(),
            })]
        );
    }

    #[test]
    fn test_chat_followed_by_blank_line() {
        let mut parser = FrameParser::new();
        let frames = feed(
            &mut parser,
            "CHAT: 0\nJOIN_ID: 1\nCLIENT_NAME: bob\nMESSAGE: hello there\n\n",
        );
        assert_eq!(
            frames,
            vec![Ok(ClientMessage::Chat {
                room_ref: RoomRef(0),
                join_id: ClientId(1),
                client_name: "bob".to_string(),
                message: "hello there".to_string(),
            })]
        );
    }

    #[test]
    fn test_disconnect_accepts_any_middle_line() {
        let mut parser = FrameParser::new();
        let frames = feed(&mut parser, "DISCONNECT: 0\nPORT: 0\nCLIENT_NAME: bob\n");
        assert_eq!(
            frames,
            vec![Ok(ClientMessage::Disconnect {
                reason: "0".to_string(),
                client_name: "bob".to_string(),
            })]
        );
    }

    #[test]
    fn test_unknown_header_is_rejected() {
        let mut parser = FrameParser::new();
        assert_eq!(
            parser.push("WHATEVER"),
            vec![Err(ProtocolError::UnknownFrame("WHATEVER".to_string()))]
        );
        assert!(!parser.is_mid_frame());
    }

    #[test]
    fn test_out_of_order_field_drops_frame() {
        let mut parser = FrameParser::new();
        parser.push("CHAT: 0");
        let frames = parser.push("MESSAGE: hi");
        assert!(matches!(
            frames.as_slice(),
            [Err(ProtocolError::MissingField { frame: "CHAT", field: "JOIN_ID", .. })]
        ));
        assert!(!parser.is_mid_frame());
    }

    #[test]
    fn test_header_inside_broken_frame_starts_new_frame() {
        let mut parser = FrameParser::new();
        parser.push("JOIN_CHATROOM: a");
        let frames = parser.push("HELO again");
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_err());
        assert_eq!(
            frames[1],
            Ok(ClientMessage::Hello {
                payload: "again".to_string()
            })
        );

        parser.push("JOIN_CHATROOM: a");
        assert_eq!(parser.push("LEAVE_CHATROOM: 1").len(), 1);
        assert!(parser.is_mid_frame());
    }

    #[test]
    fn test_message_keeps_its_whitespace() {
        let mut parser = FrameParser::new();
        let frames = feed(
            &mut parser,
            "CHAT: 0\nJOIN_ID: 1\nCLIENT_NAME:  bob \nMESSAGE:   indented  \n",
        );
        assert_eq!(
            frames,
            vec![Ok(ClientMessage::Chat {
                room_ref: RoomRef(0),
                join_id: ClientId(1),
                client_name: "bob".to_string(),
                message: "  indented  ".to_string(),
            })]
        );
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let mut parser = FrameParser::new();
        parser.push("CHAT: 0");
        parser.reset();
        assert!(!parser.is_mid_frame());
        assert_eq!(
            parser.push("HELO back"),
            vec![Ok(ClientMessage::Hello {
                payload: "back".to_string()
            })]
        );
    }

    #[test]
    fn test_decoder_reports_long_line_and_recovers() {
        let mut decoder = LineDecoder::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice("x".repeat(MAX_LINE_LENGTH + 100).as_bytes());
        buf.extend_from_slice(b"\nHELO alive\n");

        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Err(ProtocolError::LineTooLong(MAX_LINE_LENGTH)))
        );
        let mut next = decoder.decode(&mut buf).unwrap();
        while next.is_none() {
            next = decoder.decode(&mut buf).unwrap();
        }
        assert_eq!(next, Some(Ok("HELO alive".to_string())));
    }

    #[test]
    fn test_decoder_reports_invalid_utf8_and_recovers() {
        let mut decoder = LineDecoder::new();
        let mut buf = BytesMut::from(&b"HELO \xff\xfe\nHELO alive\n"[..]);

        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Err(ProtocolError::InvalidUtf8))
        );
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Ok("HELO alive".to_string()))
        );
    }

    #[test]
    fn test_non_numeric_ref_is_rejected() {
        let mut parser = FrameParser::new();
        let frames = feed(&mut parser, "LEAVE_CHATROOM: lobby\nJOIN_ID: 0\nCLIENT_NAME: x\n");
        assert_eq!(
            frames,
            vec![Err(ProtocolError::InvalidNumber {
                field: "LEAVE_CHATROOM",
                value: "lobby".to_string(),
            })]
        );
    }
}
