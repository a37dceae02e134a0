//! Immutable, reference-counted JSON values in the daemon's relaxed dialect.
//!
//! A [`Json`] wraps a shared text buffer and a span into it. Values are
//! immutable once constructed and cheap to clone: children of a container
//! share the parent's buffer, and the buffer lives until the last holder
//! releases it. Parsing is lazy — a value is just a span until a leaf is
//! actually decoded.
//!
//! The dialect is a superset of JSON: keys may be unquoted, `#` starts a
//! line comment, and commas, colons and `=` are all optional separators.
//!
//! [`JsonBuilder`] assembles arrays and objects incrementally and produces
//! a single owning [`Json`].

use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

/// Separator bytes: whitespace plus the optional `,` `:` `=` punctuation.
const fn is_sep(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b',' | b':' | b'=')
}

const fn is_structural(b: u8) -> bool {
    matches!(b, b'{' | b'}' | b'[' | b']' | b'"' | b'#')
}

/// Advances past separators and `#` line comments.
pub(crate) fn skip_separators(bytes: &[u8], mut pos: usize) -> usize {
    loop {
        while pos < bytes.len() && is_sep(bytes[pos]) {
            pos += 1;
        }
        if pos < bytes.len() && bytes[pos] == b'#' {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }
        return pos;
    }
}

/// Returns the end position of the token starting at `start`.
///
/// A token is a quoted string, a balanced container, or a bare word.
/// Unterminated strings and containers extend to the end of input.
pub(crate) fn token_end(bytes: &[u8], start: usize) -> usize {
    match bytes[start] {
        b'"' => string_end(bytes, start),
        b'{' | b'[' => {
            let mut depth = 1usize;
            let mut pos = start + 1;
            while pos < bytes.len() {
                match bytes[pos] {
                    b'"' => pos = string_end(bytes, pos),
                    b'#' => {
                        while pos < bytes.len() && bytes[pos] != b'\n' {
                            pos += 1;
                        }
                    }
                    b'{' | b'[' => {
                        depth += 1;
                        pos += 1;
                    }
                    b'}' | b']' => {
                        depth -= 1;
                        pos += 1;
                        if depth == 0 {
                            return pos;
                        }
                    }
                    _ => pos += 1,
                }
            }
            pos
        }
        _ => {
            let mut pos = start;
            while pos < bytes.len() && !is_sep(bytes[pos]) && !is_structural(bytes[pos]) {
                pos += 1;
            }
            pos
        }
    }
}

fn string_end(bytes: &[u8], start: usize) -> usize {
    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'"' => return pos + 1,
            _ => pos += 1,
        }
    }
    pos.min(bytes.len())
}

// ---------------------------------------------------------------------------
// String escaping
// ---------------------------------------------------------------------------

/// Encodes `s` as a quoted JSON string with the daemon's escape set.
pub(crate) fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Decodes the contents of a quoted string (without the surrounding quotes).
fn unescape_string(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('u') => {
                let mut code = read_hex4(&mut chars);
                // join a UTF-16 surrogate pair if one follows
                if (0xd800..0xdc00).contains(&code) {
                    let mut rest = chars.clone();
                    if rest.next() == Some('\\') && rest.next() == Some('u') {
                        let low = read_hex4(&mut rest);
                        if (0xdc00..0xe000).contains(&low) {
                            code = 0x10000 + ((code - 0xd800) << 10) + (low - 0xdc00);
                            chars = rest;
                        }
                    }
                }
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn read_hex4(chars: &mut std::str::Chars) -> u32 {
    let mut code = 0u32;
    for _ in 0..4 {
        match chars.next().and_then(|c| c.to_digit(16)) {
            Some(d) => code = code * 16 + d,
            None => return code,
        }
    }
    code
}

// ---------------------------------------------------------------------------
// Json
// ---------------------------------------------------------------------------

/// An immutable JSON value backed by a shared text buffer.
#[derive(Clone)]
pub struct Json {
    data: Arc<str>,
    start: usize,
    end: usize,
}

impl Json {
    /// Parses the first value in `s`, copying it into a shared buffer.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        Self::from_string(s.to_string())
    }

    /// Like [`from_str`](Self::from_str), taking ownership of the string.
    pub fn from_string(s: String) -> Self {
        let data: Arc<str> = Arc::from(s);
        let bytes = data.as_bytes();
        let start = skip_separators(bytes, 0);
        let end = if start < bytes.len() { token_end(bytes, start) } else { start };
        Self { data, start, end }
    }

    fn from_owned_text(text: String) -> Self {
        let end = text.len();
        Self { data: Arc::from(text), start: 0, end }
    }

    fn child(&self, start: usize, end: usize) -> Self {
        Self { data: self.data.clone(), start, end }
    }

    // -- Scalar constructors --

    pub fn null() -> Self {
        Self::from_owned_text("null".into())
    }

    pub fn boolean(value: bool) -> Self {
        Self::from_owned_text(if value { "true".into() } else { "false".into() })
    }

    pub fn int(value: i64) -> Self {
        Self::from_owned_text(value.to_string())
    }

    /// Floats are encoded with six fractional digits.
    pub fn float(value: f64) -> Self {
        Self::from_owned_text(format!("{value:.6}"))
    }

    /// Encodes `value` as a quoted, escaped JSON string.
    pub fn string(value: &str) -> Self {
        Self::from_owned_text(escape_string(value))
    }

    // -- Type checks (first-byte only; leaves stay unparsed) --

    /// The raw text of this value, exactly as it appears in the source.
    pub fn text(&self) -> &str {
        &self.data[self.start..self.end]
    }

    fn first_byte(&self) -> Option<u8> {
        self.data.as_bytes().get(self.start).copied()
    }

    pub fn is_object(&self) -> bool {
        self.first_byte() == Some(b'{')
    }

    pub fn is_array(&self) -> bool {
        self.first_byte() == Some(b'[')
    }

    pub fn is_container(&self) -> bool {
        self.is_object() || self.is_array()
    }

    pub fn is_null(&self) -> bool {
        self.text() == "null"
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.text(), "true" | "false")
    }

    pub fn is_int(&self) -> bool {
        self.as_int().is_some()
    }

    pub fn is_float(&self) -> bool {
        !self.is_int() && self.as_float().is_some()
    }

    pub fn is_string(&self) -> bool {
        match self.first_byte() {
            Some(b'"') => true,
            Some(b'{') | Some(b'[') | None => false,
            _ => !self.is_null() && !self.is_boolean() && self.as_float().is_none(),
        }
    }

    // -- Leaf decoding --

    pub fn as_bool(&self) -> Option<bool> {
        match self.text() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        self.text().parse::<i64>().ok()
    }

    pub fn as_float(&self) -> Option<f64> {
        let text = self.text();
        if text.is_empty() || self.is_container() || self.first_byte() == Some(b'"') {
            return None;
        }
        text.parse::<f64>().ok()
    }

    /// Decodes this value as a string.
    ///
    /// Quoted strings are unescaped; any other non-container value yields
    /// its literal text (so numbers and booleans stringify as written).
    /// Containers yield `None`.
    pub fn parse_string(&self) -> Option<String> {
        if self.is_container() || self.text().is_empty() {
            return None;
        }
        let text = self.text();
        if text.starts_with('"') {
            let inner = text.strip_prefix('"')?;
            let inner = inner.strip_suffix('"').unwrap_or(inner);
            Some(unescape_string(inner))
        } else {
            Some(text.to_string())
        }
    }

    // -- Container access --

    /// Iterates the elements of an array, in source order.
    pub fn array_iter(&self) -> ChildIter {
        ChildIter::new(self, self.is_array())
    }

    /// Iterates the `(key, value)` pairs of an object, in source order.
    /// Keys are yielded as JSON strings.
    pub fn object_iter(&self) -> PairIter {
        PairIter { children: ChildIter::new(self, self.is_object()) }
    }

    /// Looks up `key` in an object. Returns `None` for non-objects and
    /// missing keys.
    pub fn object_get(&self, key: &str) -> Option<Json> {
        self.object_iter()
            .find(|(k, _)| k.parse_string().as_deref() == Some(key))
            .map(|(_, v)| v)
    }

    // -- serde interop --

    /// Converts to a `serde_json::Value`, fully parsing the tree.
    pub fn to_serde(&self) -> serde_json::Value {
        use serde_json::Value;
        if self.is_object() {
            let mut map = serde_json::Map::new();
            for (key, value) in self.object_iter() {
                if let Some(k) = key.parse_string() {
                    map.insert(k, value.to_serde());
                }
            }
            Value::Object(map)
        } else if self.is_array() {
            Value::Array(self.array_iter().map(|v| v.to_serde()).collect())
        } else if self.is_null() || self.text().is_empty() {
            Value::Null
        } else if let Some(b) = self.as_bool() {
            Value::Bool(b)
        } else if let Some(i) = self.as_int() {
            Value::from(i)
        } else if let Some(f) = self.as_float() {
            serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        } else {
            self.parse_string().map(Value::String).unwrap_or(Value::Null)
        }
    }

    /// Builds a `Json` from a `serde_json::Value`.
    pub fn from_serde(value: &serde_json::Value) -> Json {
        use serde_json::Value;
        match value {
            Value::Null => Json::null(),
            Value::Bool(b) => Json::boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Json::int(i)
                } else {
                    Json::float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Json::string(s),
            Value::Array(items) => {
                let mut builder = JsonBuilder::new_array();
                for item in items {
                    builder.add_json(&Json::from_serde(item));
                }
                builder.build()
            }
            Value::Object(map) => {
                let mut builder = JsonBuilder::new_object();
                for (key, item) in map {
                    builder.add_property(key);
                    builder.add_json(&Json::from_serde(item));
                }
                builder.build()
            }
        }
    }
}

/// Splits a configuration file into its top-level `(section, value)` pairs.
///
/// A file body is an implicit object: alternating section names and values,
/// with the usual relaxed separators and comments.
pub(crate) fn top_level_pairs(content: &str) -> Vec<(String, Json)> {
    let data: Arc<str> = Arc::from(content);
    let bytes = data.as_bytes();
    let mut pairs = Vec::new();
    let mut pos = 0usize;

    loop {
        let key_start = skip_separators(bytes, pos);
        if key_start >= bytes.len() {
            break;
        }
        let key_end = token_end(bytes, key_start);
        let key = Json { data: data.clone(), start: key_start, end: key_end };
        let Some(key) = key.parse_string() else { break };

        let value_start = skip_separators(bytes, key_end);
        if value_start >= bytes.len() {
            break;
        }
        let value_end = token_end(bytes, value_start);
        pairs.push((key, Json { data: data.clone(), start: value_start, end: value_end }));
        pos = value_end;
    }

    pairs
}

impl fmt::Display for Json {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

impl fmt::Debug for Json {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Json({})", self.text())
    }
}

/// Value-wise equality: key order inside objects is not significant.
impl PartialEq for Json {
    fn eq(&self, other: &Self) -> bool {
        self.to_serde() == other.to_serde()
    }
}

// ---------------------------------------------------------------------------
// Child iterators
// ---------------------------------------------------------------------------

/// Iterator over the child tokens of a container.
#[derive(Clone)]
pub struct ChildIter {
    json: Json,
    pos: usize,
}

impl ChildIter {
    fn new(json: &Json, is_valid: bool) -> Self {
        // position past the opening bracket, or at the end for non-containers
        let pos = if is_valid { json.start + 1 } else { json.end };
        Self { json: json.clone(), pos }
    }
}

impl Iterator for ChildIter {
    type Item = Json;

    fn next(&mut self) -> Option<Json> {
        let bytes = self.json.data.as_bytes();
        // the closing bracket is inside the parent's span
        let limit = self.json.end.saturating_sub(1);
        let start = skip_separators(bytes, self.pos);
        if start >= limit {
            return None;
        }
        let end = token_end(bytes, start).min(limit.max(start));
        self.pos = end.max(start + 1);
        Some(self.json.child(start, end))
    }
}

/// Iterator over `(key, value)` pairs of an object.
pub struct PairIter {
    children: ChildIter,
}

impl Iterator for PairIter {
    type Item = (Json, Json);

    fn next(&mut self) -> Option<(Json, Json)> {
        let key = self.children.next()?;
        let value = self.children.next()?;
        Some((key, value))
    }
}

// ---------------------------------------------------------------------------
// JsonBuilder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Frame {
    Object,
    Array,
}

/// Streaming builder that assembles a single owning [`Json`].
///
/// Values added at object level must each be preceded by
/// [`add_property`](JsonBuilder::add_property). Nested containers open with
/// [`begin_object`](JsonBuilder::begin_object) /
/// [`begin_array`](JsonBuilder::begin_array) and close with
/// [`end`](JsonBuilder::end); [`build`](JsonBuilder::build) closes anything
/// still open and returns the finished value.
pub struct JsonBuilder {
    buf: String,
    stack: Vec<Frame>,
    has_items: Vec<bool>,
}

impl JsonBuilder {
    pub fn new_object() -> Self {
        Self { buf: "{".into(), stack: vec![Frame::Object], has_items: vec![false] }
    }

    pub fn new_array() -> Self {
        Self { buf: "[".into(), stack: vec![Frame::Array], has_items: vec![false] }
    }

    fn value_separator(&mut self) {
        // properties already wrote the separator at object level
        if self.stack.last() == Some(&Frame::Array) {
            if *self.has_items.last().unwrap_or(&false) {
                self.buf.push_str(", ");
            }
        }
        if let Some(flag) = self.has_items.last_mut() {
            *flag = true;
        }
    }

    /// Adds a property key; the next `add_*` call supplies its value.
    pub fn add_property(&mut self, key: &str) {
        if *self.has_items.last().unwrap_or(&false) {
            self.buf.push_str(", ");
        }
        self.buf.push_str(&escape_string(key));
        self.buf.push(':');
    }

    pub fn add_null(&mut self) {
        self.value_separator();
        self.buf.push_str("null");
    }

    pub fn add_boolean(&mut self, value: bool) {
        self.value_separator();
        self.buf.push_str(if value { "true" } else { "false" });
    }

    pub fn add_int(&mut self, value: i64) {
        self.value_separator();
        self.buf.push_str(&value.to_string());
    }

    pub fn add_float(&mut self, value: f64) {
        self.value_separator();
        self.buf.push_str(&format!("{value:.6}"));
    }

    pub fn add_string(&mut self, value: &str) {
        self.value_separator();
        self.buf.push_str(&escape_string(value));
    }

    /// Adds an already-built JSON value verbatim.
    pub fn add_json(&mut self, value: &Json) {
        self.value_separator();
        self.buf.push_str(value.text());
    }

    pub fn begin_object(&mut self) {
        self.value_separator();
        self.buf.push('{');
        self.stack.push(Frame::Object);
        self.has_items.push(false);
    }

    pub fn begin_array(&mut self) {
        self.value_separator();
        self.buf.push('[');
        self.stack.push(Frame::Array);
        self.has_items.push(false);
    }

    /// Closes the innermost open container.
    pub fn end(&mut self) {
        if let Some(frame) = self.stack.pop() {
            self.has_items.pop();
            self.buf.push(match frame {
                Frame::Object => '}',
                Frame::Array => ']',
            });
        }
    }

    /// Closes any still-open containers and returns the finished value.
    pub fn build(mut self) -> Json {
        while !self.stack.is_empty() {
            self.end();
        }
        Json::from_owned_text(self.buf)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Scalars
    // ---------------------------------------------------------------

    #[test]
    fn scalar_constructors() {
        assert!(Json::null().is_null());
        assert_eq!(Json::boolean(true).as_bool(), Some(true));
        assert_eq!(Json::int(-42).as_int(), Some(-42));
        assert_eq!(Json::float(1.5).text(), "1.500000");
        assert_eq!(Json::string("hi").text(), "\"hi\"");
    }

    #[test]
    fn type_checks_are_exclusive() {
        let cases = [
            ("null", "null"),
            ("true", "boolean"),
            ("3", "int"),
            ("3.25", "float"),
            ("\"x\"", "string"),
            ("bare-word", "string"),
            ("[1]", "array"),
            ("{a:1}", "object"),
        ];
        for (text, expected) in cases {
            let j = Json::from_str(text);
            let kind = if j.is_null() {
                "null"
            } else if j.is_boolean() {
                "boolean"
            } else if j.is_int() {
                "int"
            } else if j.is_float() {
                "float"
            } else if j.is_array() {
                "array"
            } else if j.is_object() {
                "object"
            } else if j.is_string() {
                "string"
            } else {
                "?"
            };
            assert_eq!(kind, expected, "for input {text:?}");
        }
    }

    #[test]
    fn string_unescaping() {
        let j = Json::from_str(r#""line\nbreak \"quoted\" A""#);
        assert_eq!(j.parse_string().unwrap(), "line\nbreak \"quoted\" A");
    }

    #[test]
    fn surrogate_pair_decoding() {
        let j = Json::from_str(r#""😀""#);
        assert_eq!(j.parse_string().unwrap(), "\u{1f600}");
    }

    #[test]
    fn numbers_parse_as_strings_too() {
        assert_eq!(Json::from_str("42").parse_string().unwrap(), "42");
        assert_eq!(Json::from_str("true").parse_string().unwrap(), "true");
        assert!(Json::from_str("[1]").parse_string().is_none());
    }

    // ---------------------------------------------------------------
    // Relaxed syntax
    // ---------------------------------------------------------------

    #[test]
    fn unquoted_keys_and_optional_separators() {
        let j = Json::from_str("{ media.class = Audio/Sink node.name: speaker }");
        assert!(j.is_object());
        assert_eq!(j.object_get("media.class").unwrap().parse_string().unwrap(), "Audio/Sink");
        assert_eq!(j.object_get("node.name").unwrap().parse_string().unwrap(), "speaker");
    }

    #[test]
    fn comments_are_skipped() {
        let j = Json::from_str("{\n  a = 1  # trailing comment\n  # full-line comment\n  b = 2\n}");
        assert_eq!(j.object_get("a").unwrap().as_int(), Some(1));
        assert_eq!(j.object_get("b").unwrap().as_int(), Some(2));
    }

    #[test]
    fn nested_containers_share_the_buffer() {
        let j = Json::from_str("{ outer = { inner = [1, 2] } }");
        let outer = j.object_get("outer").unwrap();
        let inner = outer.object_get("inner").unwrap();
        assert_eq!(inner.array_iter().count(), 2);
        // children share the parent's allocation
        assert!(Arc::ptr_eq(&j.data, &inner.data));
    }

    #[test]
    fn array_iteration_in_source_order() {
        let j = Json::from_str("[ 3 1 2 ]");
        let items: Vec<i64> = j.array_iter().map(|v| v.as_int().unwrap()).collect();
        assert_eq!(items, vec![3, 1, 2]);
    }

    #[test]
    fn object_get_missing_key() {
        let j = Json::from_str("{ a = 1 }");
        assert!(j.object_get("b").is_none());
        assert!(Json::from_str("[1]").object_get("a").is_none());
    }

    #[test]
    fn strings_with_structural_characters() {
        let j = Json::from_str(r#"{ k = "a { b } # not a comment" }"#);
        assert_eq!(j.object_get("k").unwrap().parse_string().unwrap(), "a { b } # not a comment");
    }

    // ---------------------------------------------------------------
    // Builder
    // ---------------------------------------------------------------

    #[test]
    fn builder_object() {
        let mut b = JsonBuilder::new_object();
        b.add_property("name");
        b.add_string("weft");
        b.add_property("priority");
        b.add_int(100);
        b.add_property("enabled");
        b.add_boolean(true);
        let j = b.build();
        assert_eq!(j.text(), "{\"name\":\"weft\", \"priority\":100, \"enabled\":true}");
        assert_eq!(j.object_get("priority").unwrap().as_int(), Some(100));
    }

    #[test]
    fn builder_nested() {
        let mut b = JsonBuilder::new_object();
        b.add_property("rules");
        b.begin_array();
        b.add_int(1);
        b.begin_object();
        b.add_property("x");
        b.add_float(0.5);
        b.end();
        b.end();
        let j = b.build();
        let rules = j.object_get("rules").unwrap();
        assert!(rules.is_array());
        let items: Vec<Json> = rules.array_iter().collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].object_get("x").unwrap().text(), "0.500000");
    }

    #[test]
    fn builder_escapes_strings() {
        let mut b = JsonBuilder::new_array();
        b.add_string("a\"b\\c\nd");
        let j = b.build();
        assert_eq!(j.text(), r#"["a\"b\\c\nd"]"#);
        let item = j.array_iter().next().unwrap();
        assert_eq!(item.parse_string().unwrap(), "a\"b\\c\nd");
    }

    #[test]
    fn builder_add_json_embeds_verbatim() {
        let child = Json::from_str("{ a = 1 }");
        let mut b = JsonBuilder::new_array();
        b.add_json(&child);
        b.add_null();
        let j = b.build();
        let items: Vec<Json> = j.array_iter().collect();
        assert!(items[0].is_object());
        assert!(items[1].is_null());
    }

    // ---------------------------------------------------------------
    // serde interop & equality
    // ---------------------------------------------------------------

    #[test]
    fn serde_round_trip() {
        let j = Json::from_str("{ a = [1, 2.5, \"x\"], b = { c = true } }");
        let v = j.to_serde();
        assert_eq!(v["a"][0], serde_json::json!(1));
        assert_eq!(v["b"]["c"], serde_json::json!(true));
        let back = Json::from_serde(&v);
        assert_eq!(back, j);
    }

    #[test]
    fn equality_ignores_key_order() {
        let a = Json::from_str("{ x = 1, y = 2 }");
        let b = Json::from_str("{ y = 2, x = 1 }");
        assert_eq!(a, b);
    }

    #[test]
    fn equality_respects_array_order() {
        assert_ne!(Json::from_str("[1, 2]"), Json::from_str("[2, 1]"));
    }
}
