use crate::collection::Document;
use crate::common::Value;
use crate::errors::{ErrorKind, MonaziteError, MonaziteResult};

/// Parses a loosely-formatted criteria string into a [Document].
///
/// The accepted syntax is the human-typed shorthand of the store's
/// shell: unquoted keys (including `$` operators and dotted paths),
/// single- or double-quoted strings, numbers, booleans, `null`, arrays,
/// and nested objects. A bare word in value position is read as a
/// string.
///
/// ```text
/// {name: 'mongo', counter: {$gt: 10}, tags: {$in: ['a', "b"]}}
/// ```
///
/// # Errors
///
/// Fails with [ErrorKind::InvalidQuery] when the input is not a single
/// well-formed object.
pub fn parse_criteria(input: &str) -> MonaziteResult<Document> {
    let mut parser = Parser::new(input);
    parser.skip_whitespace();
    let document = parser.parse_object()?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(parser.error("trailing characters after criteria object"));
    }
    Ok(document)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: &str) -> MonaziteError {
        log::error!("Failed to parse criteria at byte {}: {}", self.pos, message);
        MonaziteError::new(
            &format!("Malformed criteria string at byte {}: {}", self.pos, message),
            ErrorKind::InvalidQuery,
        )
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: u8) -> MonaziteResult<()> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            _ => Err(self.error(&format!("expected '{}'", expected as char))),
        }
    }

    fn parse_object(&mut self) -> MonaziteResult<Document> {
        self.expect(b'{')?;
        let mut document = Document::new();
        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(document);
        }
        loop {
            self.skip_whitespace();
            let key = self.parse_key()?;
            self.skip_whitespace();
            self.expect(b':')?;
            self.skip_whitespace();
            let value = self.parse_value()?;
            document.insert(key, value);
            self.skip_whitespace();
            match self.bump() {
                Some(b',') => continue,
                Some(b'}') => return Ok(document),
                _ => return Err(self.error("expected ',' or '}' in object")),
            }
        }
    }

    fn parse_array(&mut self) -> MonaziteResult<Vec<Value>> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            self.skip_whitespace();
            items.push(self.parse_value()?);
            self.skip_whitespace();
            match self.bump() {
                Some(b',') => continue,
                Some(b']') => return Ok(items),
                _ => return Err(self.error("expected ',' or ']' in array")),
            }
        }
    }

    fn parse_key(&mut self) -> MonaziteResult<String> {
        match self.peek() {
            Some(b'"') | Some(b'\'') => self.parse_quoted_string(),
            Some(c) if is_bare_key_byte(c) => Ok(self.parse_bare_word()),
            _ => Err(self.error("expected object key")),
        }
    }

    fn parse_value(&mut self) -> MonaziteResult<Value> {
        match self.peek() {
            Some(b'{') => Ok(Value::Document(self.parse_object()?)),
            Some(b'[') => Ok(Value::Array(self.parse_array()?)),
            Some(b'"') | Some(b'\'') => Ok(Value::String(self.parse_quoted_string()?)),
            Some(c) if c == b'-' || c.is_ascii_digit() => self.parse_number(),
            Some(c) if is_bare_key_byte(c) => {
                let word = self.parse_bare_word();
                Ok(match word.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" => Value::Null,
                    // lenient mode reads any other bare word as a string
                    _ => Value::String(word),
                })
            }
            _ => Err(self.error("expected a value")),
        }
    }

    fn parse_quoted_string(&mut self) -> MonaziteResult<String> {
        let quote = self.bump().ok_or_else(|| self.error("unexpected end of input"))?;
        // bytes are collected raw and decoded once, so multi-byte
        // characters survive intact
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => {
                    return String::from_utf8(out)
                        .map_err(|_| self.error("string is not valid UTF-8"));
                }
                Some(b'\\') => match self.bump() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'r') => out.push(b'\r'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape sequence")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_bare_word(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_bare_key_byte(c) || c.is_ascii_digit()) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn parse_number(&mut self) -> MonaziteResult<Value> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => self.pos += 1,
                b'.' | b'e' | b'E' | b'+' | b'-' => {
                    is_float = true;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("invalid number"))?;
        if is_float {
            text.parse::<f64>()
                .map(Value::F64)
                .map_err(|_| self.error("invalid number"))
        } else {
            text.parse::<i64>()
                .map(Value::I64)
                .map_err(|_| self.error("invalid number"))
        }
    }
}

fn is_bare_key_byte(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'$' || c == b'_' || c == b'.'
}
