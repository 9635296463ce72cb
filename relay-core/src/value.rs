//! 值类型
//!
//! In-process representation of everything that crosses the host boundary.
//! The wire form lives in [`crate::codec`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{KernelError, KernelResult};

/// Prefix shared by every reserved wire key
pub const RESERVED_PREFIX: &str = "$relay.";
/// Wire key marking an object reference payload
pub const TOKEN_REF: &str = "$relay.byref";
/// Wire key marking a date payload
pub const TOKEN_DATE: &str = "$relay.date";
/// Wire key marking an enum member payload
pub const TOKEN_ENUM: &str = "$relay.enum";

/// Opaque handle to a live instance in the object table
///
/// Rendered as `{fqn}@{id}`. Equality and hashing use both parts, so a token
/// whose type prefix was tampered with never resolves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    fqn: String,
    id: u64,
}

impl ObjectRef {
    pub(crate) fn new(fqn: impl Into<String>, id: u64) -> Self {
        Self {
            fqn: fqn.into(),
            id,
        }
    }

    /// Fully-qualified name of the instance's type
    pub fn fqn(&self) -> &str {
        &self.fqn
    }

    /// Numeric part of the token
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.fqn, self.id)
    }
}

impl FromStr for ObjectRef {
    type Err = KernelError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let (fqn, id) = token
            .rsplit_once('@')
            .ok_or_else(|| KernelError::malformed(format!("invalid object token '{token}'")))?;
        if fqn.is_empty() {
            return Err(KernelError::malformed(format!(
                "invalid object token '{token}'"
            )));
        }
        let id = id
            .parse::<u64>()
            .map_err(|_| KernelError::malformed(format!("invalid object token '{token}'")))?;
        Ok(ObjectRef::new(fqn, id))
    }
}

/// A member of a loaded enum, e.g. `calc.Color/RED`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumMember {
    pub fqn: String,
    pub member: String,
}

impl EnumMember {
    pub fn new(fqn: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            fqn: fqn.into(),
            member: member.into(),
        }
    }
}

impl fmt::Display for EnumMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.fqn, self.member)
    }
}

impl FromStr for EnumMember {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('/') {
            Some((fqn, member)) if !fqn.is_empty() && !member.is_empty() => {
                Ok(EnumMember::new(fqn, member))
            }
            _ => Err(KernelError::malformed(format!(
                "invalid enum member '{s}', expected '<fqn>/<member>'"
            ))),
        }
    }
}

/// Millisecond-precision UTC instant
///
/// Only built from whole milliseconds, so every timestamp survives the wire
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn from_millis(millis: i64) -> KernelResult<Self> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Timestamp)
            .ok_or_else(|| KernelError::malformed(format!("timestamp {millis} is out of range")))
    }

    pub fn millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

/// String-keyed mapping that can never contain a reserved key
///
/// The only way to build one is through [`Mapping::new`] / [`Mapping::insert`],
/// both of which reject keys starting with [`RESERVED_PREFIX`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapping(BTreeMap<String, Value>);

impl Mapping {
    pub fn new<I, K>(entries: I) -> KernelResult<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut map = Mapping::default();
        for (k, v) in entries {
            map.insert(k, v)?;
        }
        Ok(map)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> KernelResult<()> {
        let key = key.into();
        if key.starts_with(RESERVED_PREFIX) {
            return Err(KernelError::malformed(format!(
                "mapping key '{key}' uses the reserved prefix '{RESERVED_PREFIX}'"
            )));
        }
        self.0.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// 跨边界值
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    /// Non-finite floats are outside the representable set; build through
    /// [`Value::float`] to reject them up front
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(Mapping),
    Ref(ObjectRef),
    Date(Timestamp),
    Enum(EnumMember),
}

impl Value {
    /// Checked float; NaN and infinities have no wire form
    pub fn float(f: f64) -> KernelResult<Self> {
        if f.is_finite() {
            Ok(Value::Float(f))
        } else {
            Err(KernelError::malformed(format!("non-finite number {f}")))
        }
    }

    pub fn date_millis(millis: i64) -> KernelResult<Self> {
        Timestamp::from_millis(millis).map(Value::Date)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view that accepts both integers and floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumMember> {
        match self {
            Value::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Whether `objref` appears anywhere inside this value
    pub fn refers_to(&self, objref: &ObjectRef) -> bool {
        match self {
            Value::Ref(r) => r == objref,
            Value::Array(items) => items.iter().any(|v| v.refers_to(objref)),
            Value::Map(map) => map.iter().any(|(_, v)| v.refers_to(objref)),
            _ => false,
        }
    }

    /// 获取类型名称（用于错误信息）
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Ref(_) => "object",
            Value::Date(_) => "date",
            Value::Enum(_) => "enum",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(r: ObjectRef) -> Self {
        Value::Ref(r)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_token_roundtrip() {
        let r = ObjectRef::new("calc.Greeter", 10000);
        assert_eq!(r.to_string(), "calc.Greeter@10000");
        let parsed: ObjectRef = "calc.Greeter@10000".parse().unwrap();
        assert_eq!(parsed, r);
    }

    #[test]
    fn test_object_ref_rejects_garbage() {
        assert!("calc.Greeter".parse::<ObjectRef>().is_err());
        assert!("@12".parse::<ObjectRef>().is_err());
        assert!("calc.Greeter@x".parse::<ObjectRef>().is_err());
    }

    #[test]
    fn test_enum_member_parse() {
        let m: EnumMember = "calc.Color/RED".parse().unwrap();
        assert_eq!(m.fqn, "calc.Color");
        assert_eq!(m.member, "RED");
        assert!("calc.Color".parse::<EnumMember>().is_err());
        assert!("calc.Color/".parse::<EnumMember>().is_err());
    }

    #[test]
    fn test_mapping_rejects_reserved_keys() {
        let err = Mapping::new([("$relay.byref", Value::Null)]).unwrap_err();
        assert_eq!(err.kind(), "MalformedValue");

        let map = Mapping::new([("name", Value::from("Ada")), ("relay", Value::Int(1))]).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("name"), Some(&Value::from("Ada")));
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::Float(2.5).as_int(), None);
        assert_eq!(Value::from("x").type_name(), "string");
    }

    #[test]
    fn test_refers_to_nested() {
        let target = ObjectRef::new("demo.A", 1);
        let other = ObjectRef::new("demo.A", 2);
        let nested = Value::Array(vec![
            Value::Int(1),
            Value::Map(Mapping::new([("inner", Value::Ref(target.clone()))]).unwrap()),
        ]);
        assert!(nested.refers_to(&target));
        assert!(!nested.refers_to(&other));
        assert!(!Value::from("demo.A@1").refers_to(&target));
    }

    #[test]
    fn test_date_millis() {
        let v = Value::date_millis(0).unwrap();
        match v {
            Value::Date(d) => assert_eq!(d.millis(), 0),
            other => panic!("expected date, got {other:?}"),
        }
        assert_eq!(
            Timestamp::from_millis(1_700_000_000_123).unwrap().to_string(),
            "2023-11-14T22:13:20.123Z"
        );
    }

    #[test]
    fn test_float_rejects_non_finite() {
        assert_eq!(Value::float(2.5).unwrap(), Value::Float(2.5));
        assert_eq!(Value::float(f64::NAN).unwrap_err().kind(), "MalformedValue");
        assert_eq!(Value::float(f64::INFINITY).unwrap_err().kind(), "MalformedValue");
    }
}
