//! Incremental decoding of top-level JSON arrays
//!
//! Import payloads can be arbitrarily large, so the array is never
//! materialized. [`JsonArrayStream`] scans the input byte-by-byte, carving out
//! one complete element at a time and deserializing it in place; memory is
//! bounded by the largest single element.

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("read import payload: {0}")]
    Io(#[from] std::io::Error),

    #[error("import payload must be a JSON array")]
    NotAnArray,

    #[error("unexpected end of import payload")]
    UnexpectedEof,

    #[error("malformed import payload: expected {expected} near byte {offset}")]
    Syntax { expected: &'static str, offset: u64 },

    #[error("decode element: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Clone, Copy)]
enum State {
    Start,
    Elements { first: bool },
    Done,
}

/// Streaming reader over a top-level JSON array.
pub struct JsonArrayStream<R> {
    reader: R,
    state: State,
    /// Bytes consumed so far, for error reporting.
    offset: u64,
    scratch: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> JsonArrayStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: State::Start,
            offset: 0,
            scratch: Vec::new(),
        }
    }

    /// Consume the opening `[`. Any other payload shape is rejected.
    pub async fn begin(&mut self) -> Result<(), StreamError> {
        if !matches!(self.state, State::Start) {
            return Ok(());
        }

        self.skip_whitespace().await?;
        match self.peek().await? {
            Some(b'[') => {
                self.bump(1);
                self.state = State::Elements { first: true };
                Ok(())
            },
            Some(_) => Err(StreamError::NotAnArray),
            None => Err(StreamError::UnexpectedEof),
        }
    }

    /// Decode the next array element, or `None` once the closing `]` is seen.
    pub async fn next_element<T: DeserializeOwned>(&mut self) -> Result<Option<T>, StreamError> {
        if matches!(self.state, State::Start) {
            self.begin().await?;
        }

        let first = match self.state {
            State::Done => return Ok(None),
            State::Elements { first } => first,
            State::Start => unreachable!("begin() transitions out of Start"),
        };

        self.skip_whitespace().await?;
        match self.peek().await? {
            Some(b']') => {
                self.bump(1);
                self.state = State::Done;
                return Ok(None);
            },
            Some(b',') if !first => {
                self.bump(1);
                self.skip_whitespace().await?;
            },
            Some(_) if first => {},
            Some(_) => {
                return Err(StreamError::Syntax {
                    expected: "',' or ']'",
                    offset: self.offset,
                })
            },
            None => return Err(StreamError::UnexpectedEof),
        }

        self.scratch.clear();
        self.read_value().await?;

        let element = serde_json::from_slice(&self.scratch)?;
        self.state = State::Elements { first: false };
        Ok(Some(element))
    }

    /// Scan one complete JSON value into the scratch buffer.
    ///
    /// Containers end when their bracket depth returns to zero; strings end at
    /// the unescaped closing quote; bare scalars end at the enclosing array's
    /// `,` / `]` (left unconsumed) or at whitespace.
    async fn read_value(&mut self) -> Result<(), StreamError> {
        let mut depth: usize = 0;
        let mut in_string = false;
        let mut escaped = false;
        let mut started = false;

        loop {
            let Some(byte) = self.peek().await? else {
                return Err(StreamError::UnexpectedEof);
            };

            if in_string {
                self.push(byte);
                if escaped {
                    escaped = false;
                } else if byte == b'\\' {
                    escaped = true;
                } else if byte == b'"' {
                    in_string = false;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                continue;
            }

            match byte {
                b'"' => {
                    started = true;
                    in_string = true;
                    self.push(byte);
                },
                b'{' | b'[' => {
                    started = true;
                    depth += 1;
                    self.push(byte);
                },
                b'}' | b']' if depth == 0 => {
                    if started {
                        // scalar ran up against the enclosing array's `]`
                        return Ok(());
                    }
                    return Err(StreamError::Syntax {
                        expected: "a JSON value",
                        offset: self.offset,
                    });
                },
                b'}' | b']' => {
                    depth -= 1;
                    self.push(byte);
                    if depth == 0 {
                        return Ok(());
                    }
                },
                b',' if depth == 0 => {
                    if started {
                        return Ok(());
                    }
                    return Err(StreamError::Syntax {
                        expected: "a JSON value",
                        offset: self.offset,
                    });
                },
                b' ' | b'\t' | b'\n' | b'\r' if depth == 0 => {
                    if started {
                        return Ok(());
                    }
                    self.bump(1);
                },
                _ => {
                    started = true;
                    self.push(byte);
                },
            }
        }
    }

    async fn skip_whitespace(&mut self) -> Result<(), StreamError> {
        while let Some(byte) = self.peek().await? {
            match byte {
                b' ' | b'\t' | b'\n' | b'\r' => self.bump(1),
                _ => break,
            }
        }
        Ok(())
    }

    async fn peek(&mut self) -> Result<Option<u8>, StreamError> {
        let buf = self.reader.fill_buf().await?;
        Ok(buf.first().copied())
    }

    fn bump(&mut self, n: usize) {
        self.reader.consume(n);
        self.offset += n as u64;
    }

    fn push(&mut self, byte: u8) {
        self.scratch.push(byte);
        self.bump(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::Value;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: String,
        #[serde(default)]
        tags: Vec<String>,
    }

    fn stream(payload: &str) -> JsonArrayStream<tokio::io::BufReader<std::io::Cursor<Vec<u8>>>> {
        JsonArrayStream::new(tokio::io::BufReader::new(std::io::Cursor::new(
            payload.as_bytes().to_vec(),
        )))
    }

    async fn collect_rows(payload: &str) -> Result<Vec<Row>, StreamError> {
        let mut stream = stream(payload);
        stream.begin().await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next_element::<Row>().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    #[tokio::test]
    async fn test_reads_objects_in_order() {
        let rows = collect_rows(r#"[{"id":"a"},{"id":"b"},{"id":"c"}]"#)
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].id, "a");
        assert_eq!(rows[2].id, "c");
    }

    #[tokio::test]
    async fn test_empty_array_yields_nothing() {
        let rows = collect_rows("[]").await.unwrap();
        assert!(rows.is_empty());

        let rows = collect_rows("  [\n]\n").await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_whitespace_between_elements() {
        let rows = collect_rows("[\n  {\"id\": \"a\"} ,\n\t{\"id\": \"b\"}\n]")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_nested_containers_and_bracket_strings() {
        let rows = collect_rows(r#"[{"id":"a]{,", "tags":["x,y","[z]"]},{"id":"b\"quoted\""}]"#)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tags, vec!["x,y", "[z]"]);
        assert_eq!(rows[1].id, "b\"quoted\"");
    }

    #[tokio::test]
    async fn test_escaped_backslash_before_quote() {
        let rows = collect_rows(r#"[{"id":"trailing\\"},{"id":"b"}]"#).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "trailing\\");
    }

    #[tokio::test]
    async fn test_object_payload_is_not_an_array() {
        let err = collect_rows(r#"{"id":"a"}"#).await.unwrap_err();
        assert!(matches!(err, StreamError::NotAnArray));
    }

    #[tokio::test]
    async fn test_scalar_payload_is_not_an_array() {
        let err = collect_rows("42").await.unwrap_err();
        assert!(matches!(err, StreamError::NotAnArray));
    }

    #[tokio::test]
    async fn test_empty_payload_is_unexpected_eof() {
        let err = collect_rows("").await.unwrap_err();
        assert!(matches!(err, StreamError::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_unexpected_eof() {
        let err = collect_rows(r#"[{"id":"a"},{"id":"b""#).await.unwrap_err();
        assert!(matches!(err, StreamError::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_element_type_mismatch_is_decode_error() {
        let err = collect_rows(r#"[{"id":"a"},5]"#).await.unwrap_err();
        assert!(matches!(err, StreamError::Decode(_)));
    }

    #[tokio::test]
    async fn test_trailing_comma_is_syntax_error() {
        let err = collect_rows(r#"[{"id":"a"},]"#).await.unwrap_err();
        assert!(matches!(err, StreamError::Syntax { .. }));
    }

    #[tokio::test]
    async fn test_missing_comma_is_syntax_error() {
        let err = collect_rows(r#"[{"id":"a"} {"id":"b"}]"#).await.unwrap_err();
        assert!(matches!(err, StreamError::Syntax { .. }));
    }

    #[tokio::test]
    async fn test_scalar_elements_decode_as_values() {
        let mut s = stream(r#"[1, "two", true, null, [3]]"#);
        s.begin().await.unwrap();
        let mut values = Vec::new();
        while let Some(value) = s.next_element::<Value>().await.unwrap() {
            values.push(value);
        }
        assert_eq!(
            values,
            vec![
                Value::from(1),
                Value::from("two"),
                Value::from(true),
                Value::Null,
                serde_json::json!([3]),
            ]
        );
    }

    #[tokio::test]
    async fn test_next_element_after_end_keeps_returning_none() {
        let mut s = stream("[]");
        s.begin().await.unwrap();
        assert!(s.next_element::<Value>().await.unwrap().is_none());
        assert!(s.next_element::<Value>().await.unwrap().is_none());
    }
}
