//! Canonical byte encoding of argument values.
//!
//! The encoding is tagged and length-prefixed so that no two distinct values
//! share a representation. Mapping keys are emitted in sorted order and
//! sequences in declaration order. References are replaced by the referenced
//! step's identifier, never by its value.

use std::collections::BTreeMap;

use super::StepId;
use crate::spec::{ArgumentValue, StepRef};

/// Encodes argument values into a stable byte stream.
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buf: Vec<u8>,
}

impl CanonicalEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw, length-prefixed string field.
    pub fn write_str(&mut self, s: &str) {
        self.buf.push(b's');
        self.buf.extend_from_slice(s.len().to_string().as_bytes());
        self.buf.push(b':');
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Appends an argument mapping, resolving references with `resolve`.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `resolve`.
    pub fn write_arguments<'a, E, I, F>(&mut self, arguments: I, resolve: &mut F) -> Result<(), E>
    where
        I: IntoIterator<Item = (&'a String, &'a ArgumentValue)>,
        F: FnMut(&StepRef) -> Result<StepId, E>,
    {
        let sorted: BTreeMap<&String, &ArgumentValue> = arguments.into_iter().collect();
        self.write_mapping(sorted.into_iter(), resolve)
    }

    /// Appends a single value.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `resolve`.
    pub fn write_value<E, F>(&mut self, value: &ArgumentValue, resolve: &mut F) -> Result<(), E>
    where
        F: FnMut(&StepRef) -> Result<StepId, E>,
    {
        match value {
            ArgumentValue::Null => self.buf.push(b'n'),
            ArgumentValue::Bool(b) => {
                self.buf.push(b'b');
                self.buf.push(if *b { b'1' } else { b'0' });
            }
            ArgumentValue::Integer(i) => {
                self.buf.push(b'i');
                self.buf.extend_from_slice(i.to_string().as_bytes());
                self.buf.push(b';');
            }
            ArgumentValue::Float(f) => {
                self.buf.push(b'f');
                self.buf.extend_from_slice(format!("{:016x}", f.to_bits()).as_bytes());
                self.buf.push(b';');
            }
            ArgumentValue::String(s) => self.write_str(s),
            ArgumentValue::Reference(r) => {
                let id = resolve(r)?;
                self.buf.push(b'r');
                self.buf.extend_from_slice(id.as_str().as_bytes());
                self.buf.push(b'|');
                match &r.field {
                    Some(field) => self.write_str(field),
                    None => self.buf.push(b'-'),
                }
                self.buf.push(b';');
            }
            ArgumentValue::Sequence(items) => {
                self.buf.push(b'l');
                self.buf.extend_from_slice(items.len().to_string().as_bytes());
                self.buf.push(b'[');
                for item in items {
                    self.write_value(item, resolve)?;
                }
                self.buf.push(b']');
            }
            ArgumentValue::Mapping(map) => self.write_mapping(map.iter(), resolve)?,
        }
        Ok(())
    }

    fn write_mapping<'a, E, I, F>(&mut self, entries: I, resolve: &mut F) -> Result<(), E>
    where
        I: ExactSizeIterator<Item = (&'a String, &'a ArgumentValue)>,
        F: FnMut(&StepRef) -> Result<StepId, E>,
    {
        self.buf.push(b'm');
        self.buf.extend_from_slice(entries.len().to_string().as_bytes());
        self.buf.push(b'{');
        for (key, value) in entries {
            self.write_str(key);
            self.write_value(value, resolve)?;
        }
        self.buf.push(b'}');
        Ok(())
    }

    /// Returns the encoded bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn encode(value: &ArgumentValue) -> Vec<u8> {
        let mut enc = CanonicalEncoder::new();
        enc.write_value(value, &mut |_r: &StepRef| -> Result<StepId, Infallible> {
            Ok(StepId::from_digest_bytes(&[0u8; 16]))
        })
        .unwrap();
        enc.finish()
    }

    #[test]
    fn test_primitives() {
        assert_eq!(encode(&ArgumentValue::Null), b"n");
        assert_eq!(encode(&ArgumentValue::Bool(true)), b"b1");
        assert_eq!(encode(&ArgumentValue::Integer(-42)), b"i-42;");
        assert_eq!(encode(&ArgumentValue::from("hola")), b"s4:hola");
    }

    #[test]
    fn test_mapping_order_insensitive() {
        let a: ArgumentValue = serde_json::json!({"b": 2, "a": 1}).try_into().unwrap();
        let b: ArgumentValue = serde_json::json!({"a": 1, "b": 2}).try_into().unwrap();
        assert_eq!(encode(&a), encode(&b));
    }

    #[test]
    fn test_sequence_order_sensitive() {
        let a = ArgumentValue::from(vec![1, 2]);
        let b = ArgumentValue::from(vec![2, 1]);
        assert_ne!(encode(&a), encode(&b));
    }

    #[test]
    fn test_no_ambiguity_between_types() {
        assert_ne!(encode(&ArgumentValue::Integer(1)), encode(&ArgumentValue::Float(1.0)));
        assert_ne!(encode(&ArgumentValue::from("1")), encode(&ArgumentValue::Integer(1)));
        assert_ne!(
            encode(&ArgumentValue::from(vec!["ab"])),
            encode(&ArgumentValue::from(vec!["a", "b"]))
        );
    }

    #[test]
    fn test_reference_field_is_encoded() {
        let whole = ArgumentValue::reference("a");
        let field = ArgumentValue::reference_field("a", "x");
        assert_ne!(encode(&whole), encode(&field));
    }
}
