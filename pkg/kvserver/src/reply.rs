//! Converts handler return values into RESP reply frames. A closed tagged
//! union replacing the original's runtime type switch in
//! `original_source/response.go` (design note: "closed tagged union
//! instead of runtime type inspection").

use bytes::Bytes;
use resp::FrameWriter;

/// An object that knows how to write its own reply frame, for handlers that
/// need a shape `ReplyValue` doesn't cover directly. Mirrors
/// `CustomResponse`/`CustomResponseFunc` in `original_source/response.go`.
pub trait CustomReply: Send + Sync {
	fn append_to(&self, w: &mut FrameWriter);
}

impl<F: Fn(&mut FrameWriter) + Send + Sync> CustomReply for F {
	fn append_to(&self, w: &mut FrameWriter) {
		(self)(w)
	}
}

pub enum ReplyValue {
	Nil,
	Bool(bool),
	Int(i64),
	Float(f64),
	Bulk(Bytes),
	Text(String),
	/// An error value. Only the `ERR ` prefix is added here — `READONLY `
	/// errors are never represented as a `ReplyValue`; C6 emits them
	/// directly, before a handler is ever invoked.
	Error(String),
	Custom(Box<dyn CustomReply>),
	Array(Vec<ReplyValue>),
	Map(Vec<(String, String)>),
}

impl ReplyValue {
	pub fn kind(&self) -> &'static str {
		match self {
			ReplyValue::Nil => "nil",
			ReplyValue::Bool(_) => "bool",
			ReplyValue::Int(_) => "int",
			ReplyValue::Float(_) => "float",
			ReplyValue::Bulk(_) => "bulk",
			ReplyValue::Text(_) => "text",
			ReplyValue::Error(_) => "error",
			ReplyValue::Custom(_) => "custom",
			ReplyValue::Array(_) => "array",
			ReplyValue::Map(_) => "map",
		}
	}

	pub fn error(msg: impl Into<String>) -> Self {
		ReplyValue::Error(msg.into())
	}

	pub fn text(s: impl Into<String>) -> Self {
		ReplyValue::Text(s.into())
	}

	pub fn bulk(b: impl Into<Bytes>) -> Self {
		ReplyValue::Bulk(b.into())
	}
}

pub fn encode(value: &ReplyValue, w: &mut FrameWriter) {
	match value {
		ReplyValue::Nil => w.append_nil(),
		ReplyValue::Bool(b) => w.append_int(if *b { 1 } else { 0 }),
		ReplyValue::Int(n) => w.append_int(*n),
		ReplyValue::Float(f) => w.append_inline_string(&format_float(*f)),
		ReplyValue::Bulk(b) => w.append_bulk(b),
		ReplyValue::Text(s) => w.append_bulk_string(s),
		ReplyValue::Error(msg) => w.append_error(&format!("ERR {}", msg)),
		ReplyValue::Custom(c) => c.append_to(w),
		ReplyValue::Array(items) => {
			w.append_array_len(items.len());
			for item in items {
				encode(item, w);
			}
		}
		ReplyValue::Map(pairs) => {
			w.append_array_len(pairs.len() * 2);
			for (k, v) in pairs {
				w.append_bulk_string(k);
				w.append_bulk_string(v);
			}
		}
	}
}

/// Shortest round-tripping decimal representation, mirroring
/// `strconv.FormatFloat(v, 'f', -1, bitSize)` in `original_source/response.go`.
fn format_float(f: f64) -> String {
	let mut s = format!("{}", f);
	if !s.contains('.') && !s.contains('e') && !s.contains("inf") && !s.contains("NaN") {
		s.push_str(".0");
	}
	s
}

/// Formats the catch-all error a `CustomReply` responder sends when it
/// decides, at run time, that it has nothing sensible to write for the
/// request it was given. Mirrors `respondWith`'s `default` branch in
/// `original_source/response.go`, which formats the Go type name of the
/// unsupported value; `kind` plays that role here.
pub fn encode_unsupported(kind: &str, w: &mut FrameWriter) {
	w.append_error(&format!("ERR unsupported response type {}", kind));
}

#[cfg(test)]
mod tests {
	use super::*;

	fn encoded(v: ReplyValue) -> Vec<u8> {
		let mut w = FrameWriter::new();
		encode(&v, &mut w);
		w.as_bytes().to_vec()
	}

	#[test]
	fn reply_table() {
		assert_eq!(encoded(ReplyValue::Nil), b"$-1\r\n");
		assert_eq!(encoded(ReplyValue::Int(33)), b":33\r\n");
		assert_eq!(encoded(ReplyValue::Bool(true)), b":1\r\n");
		assert_eq!(encoded(ReplyValue::Float(0.7357)), b"+0.7357\r\n");
		assert_eq!(encoded(ReplyValue::text("many words")), b"$10\r\nmany words\r\n");

		assert_eq!(
			encoded(ReplyValue::Array(vec![
				ReplyValue::text("a"),
				ReplyValue::text("b"),
				ReplyValue::text("c"),
			])),
			b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n"
		);

		assert_eq!(
			encoded(ReplyValue::Map(vec![("a".to_string(), "b".to_string())])),
			b"*2\r\n$1\r\na\r\n$1\r\nb\r\n"
		);
	}

	#[test]
	fn error_gets_err_prefix() {
		assert_eq!(encoded(ReplyValue::error("failed")), b"-ERR failed\r\n");
	}

	#[test]
	fn custom_responder_can_report_an_unsupported_kind() {
		let responder = |w: &mut FrameWriter| encode_unsupported("histogram", w);
		let v = ReplyValue::Custom(Box::new(responder));
		assert_eq!(v.kind(), "custom");
		assert_eq!(encoded(v), b"-ERR unsupported response type histogram\r\n");
	}
}
