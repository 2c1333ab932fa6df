//! Redaction helpers for serializing `SecretString` fields without ever
//! writing their contents out.

use secrecy::SecretString;
use serde::Serializer;

pub fn ser_redact<S: Serializer>(_: &SecretString, s: S) -> Result<S::Ok, S::Error> {
	s.serialize_str("[redacted]")
}

pub fn ser_redact_opt<S: Serializer>(
	v: &Option<SecretString>,
	s: S,
) -> Result<S::Ok, S::Error> {
	match v {
		Some(_) => s.serialize_str("[redacted]"),
		None => s.serialize_none(),
	}
}
