//! Typed access to raw subgraph JSON.
//!
//! Lookups take dotted paths (`pool.token0.symbol`) and report failures
//! with the full path and the record they came from. Absent keys and JSON
//! `null` are both "unset"; a present value of the wrong type is an error.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::NormalizeError;
use crate::models::EventKind;

/// Which record a field belongs to, for error reporting.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    Transaction { id: Option<&'a str> },
    Event {
        transaction_id: &'a str,
        kind: EventKind,
        index: usize,
    },
    Token { index: usize },
}

impl Scope<'_> {
    pub fn error(&self, field: &str, reason: impl Into<String>) -> NormalizeError {
        let reason = reason.into();
        match *self {
            Scope::Transaction { id } => NormalizeError::MalformedTransaction {
                transaction_id: id.map(str::to_string),
                field: field.to_string(),
                reason,
            },
            Scope::Event {
                transaction_id,
                kind,
                index,
            } => NormalizeError::MalformedEvent {
                transaction_id: transaction_id.to_string(),
                kind,
                index,
                field: field.to_string(),
                reason,
            },
            Scope::Token { index } => NormalizeError::MalformedResponse(format!(
                "token #{index}: field `{field}` {reason}"
            )),
        }
    }
}

pub struct Fields<'a> {
    object: &'a Map<String, Value>,
    scope: Scope<'a>,
}

impl<'a> Fields<'a> {
    pub fn new(value: &'a Value, scope: Scope<'a>) -> Result<Self, NormalizeError> {
        match value {
            Value::Object(object) => Ok(Self { object, scope }),
            _ => Err(scope.error("<record>", "is not an object")),
        }
    }

    pub fn lookup(&self, path: &str) -> Result<Option<&'a Value>, NormalizeError> {
        let mut current = self.object;
        let mut segments = path.split('.').peekable();
        let mut walked = 0;

        while let Some(segment) = segments.next() {
            walked += segment.len();
            let value = match current.get(segment) {
                None | Some(Value::Null) => return Ok(None),
                Some(value) => value,
            };
            if segments.peek().is_none() {
                return Ok(Some(value));
            }
            current = match value {
                Value::Object(object) => object,
                _ => return Err(self.scope.error(&path[..walked], "is not an object")),
            };
            walked += 1;
        }
        Ok(None)
    }

    pub fn text(&self, path: &str) -> Result<String, NormalizeError> {
        self.text_ref(path).map(str::to_string)
    }

    /// Like [`Fields::text`], borrowing from the payload.
    pub fn text_ref(&self, path: &str) -> Result<&'a str, NormalizeError> {
        match self.lookup(path)? {
            None => Err(self.scope.error(path, "is missing")),
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(_) => Err(self.scope.error(path, "must be a string")),
        }
    }

    pub fn optional_text(&self, path: &str) -> Result<Option<String>, NormalizeError> {
        match self.lookup(path)? {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.scope.error(path, "must be a string")),
        }
    }

    /// Exact decimal text. Integral JSON numbers are rendered as written;
    /// fractional JSON numbers are refused since they already went through
    /// a float.
    pub fn decimal(&self, path: &str) -> Result<String, NormalizeError> {
        self.optional_decimal(path)?
            .ok_or_else(|| self.scope.error(path, "is missing"))
    }

    pub fn optional_decimal(&self, path: &str) -> Result<Option<String>, NormalizeError> {
        match self.lookup(path)? {
            None => Ok(None),
            Some(Value::String(s)) if is_decimal(s) => Ok(Some(s.clone())),
            Some(Value::String(s)) => Err(self
                .scope
                .error(path, format!("must be a decimal string, got {s:?}"))),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(Some(n.to_string())),
            Some(Value::Number(_)) => Err(self
                .scope
                .error(path, "must be a decimal string, got a floating-point number")),
            Some(_) => Err(self.scope.error(path, "must be a decimal string")),
        }
    }

    pub fn integer<T: FromStr>(&self, path: &str) -> Result<T, NormalizeError> {
        self.optional_integer(path)?
            .ok_or_else(|| self.scope.error(path, "is missing"))
    }

    /// Accepts JSON integers and integer strings, the subgraph sends both.
    pub fn optional_integer<T: FromStr>(&self, path: &str) -> Result<Option<T>, NormalizeError> {
        let raw = match self.lookup(path)? {
            None => return Ok(None),
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => return Err(self.scope.error(path, "must be an integer")),
        };
        raw.parse::<T>()
            .map(Some)
            .map_err(|_| self.scope.error(path, format!("must be an integer, got {raw:?}")))
    }

    /// Top-level entries whose keys are not in `consumed`.
    pub fn remaining(&self, consumed: &[&str]) -> BTreeMap<String, Value> {
        self.object
            .iter()
            .filter(|(key, _)| !consumed.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Optional sign, digits, then an optional `.digits` fraction.
fn is_decimal(text: &str) -> bool {
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };
    let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());

    digits(whole) && fraction.map_or(true, digits)
}
