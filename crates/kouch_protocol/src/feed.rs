//! Incremental decoding of `feed=normal` changes responses.
//!
//! A normal changes response is one JSON object:
//!
//! ```text
//! {"results":[
//! {"seq":...,"id":"foo","changes":[{"rev":"1-a"}]},
//! ...
//! ],
//! "last_seq":"...","pending":0}
//! ```
//!
//! The `results` array can be arbitrarily large, so [`FeedDecoder`] is fed the
//! body chunk by chunk and hands back each change as soon as its closing
//! brace arrives. Only the bytes of the record currently being read are
//! buffered.

use crate::change::{Change, Seq};
use crate::error::{ProtocolError, ProtocolResult};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Prelude,
    Results,
    Trailer,
}

/// Push-based decoder for a changes feed body.
#[derive(Debug)]
pub struct FeedDecoder {
    buf: Vec<u8>,
    pos: usize,
    depth: usize,
    in_string: bool,
    escape: bool,
    phase: Phase,
    string_start: usize,
    last_string: Vec<u8>,
    elem_start: Option<usize>,
    trailer: Vec<u8>,
}

impl FeedDecoder {
    /// Creates a decoder positioned before the response body.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            depth: 0,
            in_string: false,
            escape: false,
            phase: Phase::Prelude,
            string_start: 0,
            last_string: Vec::new(),
            elem_start: None,
            trailer: Vec::new(),
        }
    }

    /// Feeds the next chunk of the body, returning every change completed by
    /// it, in feed order.
    pub fn push(&mut self, chunk: &[u8]) -> ProtocolResult<Vec<Change>> {
        if self.phase == Phase::Trailer {
            self.trailer.extend_from_slice(chunk);
            return Ok(Vec::new());
        }
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while self.pos < self.buf.len() {
            let b = self.buf[self.pos];

            if self.in_string {
                if self.escape {
                    self.escape = false;
                } else if b == b'\\' {
                    self.escape = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.phase == Phase::Prelude && self.depth == 1 {
                        self.last_string = self.buf[self.string_start..self.pos].to_vec();
                    }
                }
                self.pos += 1;
                continue;
            }

            match b {
                b'"' => {
                    self.in_string = true;
                    self.string_start = self.pos + 1;
                }
                b'{' | b'[' => {
                    if self.depth == 0 && b != b'{' {
                        return Err(ProtocolError::MalformedFeed(
                            "response is not a JSON object".into(),
                        ));
                    }
                    if self.phase == Phase::Prelude
                        && self.depth == 1
                        && b == b'['
                        && self.last_string == b"results"
                    {
                        self.phase = Phase::Results;
                    } else if self.phase == Phase::Results && self.depth == 2 && b == b'{' {
                        self.elem_start = Some(self.pos);
                    }
                    self.depth += 1;
                }
                b'}' | b']' => {
                    if self.depth == 0 {
                        return Err(ProtocolError::MalformedFeed("unbalanced brackets".into()));
                    }
                    self.depth -= 1;
                    if self.phase == Phase::Results {
                        if self.depth == 2 && b == b'}' {
                            if let Some(start) = self.elem_start.take() {
                                let change: Change =
                                    serde_json::from_slice(&self.buf[start..=self.pos])?;
                                out.push(change);
                            }
                        } else if self.depth == 1 && b == b']' {
                            self.phase = Phase::Trailer;
                            self.trailer.extend_from_slice(&self.buf[self.pos + 1..]);
                            self.buf.clear();
                            self.pos = 0;
                            return Ok(out);
                        }
                    }
                }
                b if b.is_ascii_whitespace() => {}
                _ => {
                    if self.depth == 0 {
                        return Err(ProtocolError::MalformedFeed(
                            "response is not a JSON object".into(),
                        ));
                    }
                }
            }
            self.pos += 1;
        }

        self.compact();
        Ok(out)
    }

    /// Drops bytes that no longer belong to a pending record.
    fn compact(&mut self) {
        if self.phase != Phase::Results {
            return;
        }
        let keep_from = self.elem_start.unwrap_or(self.pos);
        if keep_from > 0 {
            self.buf.drain(..keep_from);
            self.pos -= keep_from;
            if let Some(start) = self.elem_start.as_mut() {
                *start = 0;
            }
        }
    }

    /// Completes decoding, returning `last_seq` if the server sent one.
    pub fn finish(self) -> ProtocolResult<Option<Seq>> {
        if self.phase != Phase::Trailer {
            return Err(ProtocolError::MalformedFeed(
                "feed ended before the results array was closed".into(),
            ));
        }
        let text = String::from_utf8_lossy(&self.trailer);
        let rest = text.trim_start();
        let rest = rest.strip_prefix(',').unwrap_or(rest);
        let trailer: Map<String, Value> = serde_json::from_str(&format!("{{{rest}"))?;
        Ok(trailer.get("last_seq").cloned().map(Seq))
    }
}

impl Default for FeedDecoder {
    fn default() -> Self {
        Self::new()
    }
}
