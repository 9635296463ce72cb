//! 值编解码
//!
//! Converts between [`Value`] and the JSON wire form. Object references,
//! dates and enum members travel as single-key objects tagged with a reserved
//! `$relay.` key.

use chrono::DateTime;
use serde_json::{Map, Number, Value as Json};

use crate::error::{KernelError, KernelResult};
use crate::objects::ObjectTable;
use crate::registry::TypeRegistry;
use crate::value::{
    EnumMember, Mapping, ObjectRef, Timestamp, Value, RESERVED_PREFIX, TOKEN_DATE, TOKEN_ENUM,
    TOKEN_REF,
};

/// Borrowed view of the state needed to validate references and enums
#[derive(Clone, Copy)]
pub struct Codec<'a> {
    registry: &'a TypeRegistry,
    objects: &'a ObjectTable,
}

impl<'a> Codec<'a> {
    pub fn new(registry: &'a TypeRegistry, objects: &'a ObjectTable) -> Self {
        Self { registry, objects }
    }

    /// 编码为线上格式
    pub fn encode(&self, value: &Value) -> KernelResult<Json> {
        Ok(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(Json::Number)
                .ok_or_else(|| KernelError::malformed(format!("cannot encode non-finite number {f}")))?,
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(
                items
                    .iter()
                    .map(|item| self.encode(item))
                    .collect::<KernelResult<_>>()?,
            ),
            Value::Map(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map.iter() {
                    out.insert(k.clone(), self.encode(v)?);
                }
                Json::Object(out)
            }
            Value::Ref(objref) => {
                if !self.objects.contains(objref) {
                    return Err(KernelError::Internal(format!(
                        "attempted to encode dead reference '{objref}'"
                    )));
                }
                encode_ref(objref)
            }
            Value::Date(date) => tagged(TOKEN_DATE, Json::String(date.to_string())),
            Value::Enum(member) => tagged(TOKEN_ENUM, Json::String(member.to_string())),
        })
    }

    /// 从线上格式解码
    pub fn decode(&self, json: &Json) -> KernelResult<Value> {
        match json {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Int(i)),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| KernelError::malformed(format!("unrepresentable number {n}"))),
            },
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Array(items) => items
                .iter()
                .map(|item| self.decode(item))
                .collect::<KernelResult<Vec<_>>>()
                .map(Value::Array),
            Json::Object(map) => {
                if map.keys().any(|k| k.starts_with(RESERVED_PREFIX)) {
                    return self.decode_tagged(map);
                }
                let mut out = Mapping::default();
                for (k, v) in map {
                    out.insert(k.clone(), self.decode(v)?)?;
                }
                Ok(Value::Map(out))
            }
        }
    }

    fn decode_tagged(&self, map: &Map<String, Json>) -> KernelResult<Value> {
        let mut entries = map.iter();
        let (Some((key, payload)), None) = (entries.next(), entries.next()) else {
            return Err(KernelError::malformed(format!(
                "tagged payload must have exactly one key, got {}",
                map.len()
            )));
        };
        let text = payload.as_str().ok_or_else(|| {
            KernelError::malformed(format!("payload of '{key}' must be a string"))
        })?;

        match key.as_str() {
            TOKEN_REF => {
                let objref: ObjectRef = text.parse()?;
                if !self.objects.contains(&objref) {
                    return Err(KernelError::ObjectNotFound {
                        objref: objref.to_string(),
                    });
                }
                Ok(Value::Ref(objref))
            }
            TOKEN_DATE => {
                let parsed = DateTime::parse_from_rfc3339(text)
                    .map_err(|e| KernelError::malformed(format!("invalid date '{text}': {e}")))?;
                // Wire dates carry millisecond precision.
                Timestamp::from_millis(parsed.timestamp_millis()).map(Value::Date)
            }
            TOKEN_ENUM => {
                let member: EnumMember = text.parse()?;
                self.registry.enum_member(&member.fqn, &member.member)?;
                Ok(Value::Enum(member))
            }
            other => Err(KernelError::malformed(format!("unknown tagged payload '{other}'"))),
        }
    }

    /// Extract the object token of a request field
    ///
    /// Accepts either a byref payload or the bare token string; the token
    /// must be live.
    pub fn parse_objref(&self, json: &Json) -> KernelResult<ObjectRef> {
        let token = match json {
            Json::String(s) => s.as_str(),
            Json::Object(map) if map.len() == 1 => map
                .get(TOKEN_REF)
                .and_then(Json::as_str)
                .ok_or_else(|| KernelError::malformed("expected an object reference"))?,
            _ => return Err(KernelError::malformed("expected an object reference")),
        };
        let objref: ObjectRef = token.parse()?;
        if !self.objects.contains(&objref) {
            return Err(KernelError::ObjectNotFound {
                objref: objref.to_string(),
            });
        }
        Ok(objref)
    }
}

/// Wire payload for a reference, without liveness checks
pub fn encode_ref(objref: &ObjectRef) -> Json {
    tagged(TOKEN_REF, Json::String(objref.to_string()))
}

fn tagged(key: &str, payload: Json) -> Json {
    let mut map = Map::with_capacity(1);
    map.insert(key.to_string(), payload);
    Json::Object(map)
}
