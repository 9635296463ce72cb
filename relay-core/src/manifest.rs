//! 程序集清单
//!
//! Serde model of the JSON manifest emitted by the type-model compiler. Only
//! the parts the kernel needs are modelled; unknown fields (docs, locations)
//! are ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A loaded module's public surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assembly {
    pub name: String,
    pub version: String,
    /// Per-language naming hints, returned verbatim by the Naming request
    #[serde(default)]
    pub targets: BTreeMap<String, serde_json::Value>,
    /// Types keyed by fully-qualified name
    #[serde(default)]
    pub types: BTreeMap<String, TypeDef>,
}

impl Assembly {
    /// Parse a manifest from JSON text
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// 类型定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeDef {
    Class(ClassType),
    Interface(InterfaceType),
    Enum(EnumType),
}

impl TypeDef {
    pub fn fqn(&self) -> &str {
        match self {
            TypeDef::Class(c) => &c.fqn,
            TypeDef::Interface(i) => &i.fqn,
            TypeDef::Enum(e) => &e.fqn,
        }
    }

    pub fn assembly(&self) -> &str {
        match self {
            TypeDef::Class(c) => &c.assembly,
            TypeDef::Interface(i) => &i.assembly,
            TypeDef::Enum(e) => &e.assembly,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeDef::Class(_) => "class",
            TypeDef::Interface(_) => "interface",
            TypeDef::Enum(_) => "enum",
        }
    }

    /// Declared methods; empty for enums
    pub fn methods(&self) -> &[Method] {
        match self {
            TypeDef::Class(c) => &c.methods,
            TypeDef::Interface(i) => &i.methods,
            TypeDef::Enum(_) => &[],
        }
    }

    /// Declared properties; empty for enums
    pub fn properties(&self) -> &[Property] {
        match self {
            TypeDef::Class(c) => &c.properties,
            TypeDef::Interface(i) => &i.properties,
            TypeDef::Enum(_) => &[],
        }
    }

    /// Implemented (class) or extended (interface) interfaces
    pub fn interfaces(&self) -> &[String] {
        match self {
            TypeDef::Class(c) => &c.interfaces,
            TypeDef::Interface(i) => &i.interfaces,
            TypeDef::Enum(_) => &[],
        }
    }

    pub fn as_class(&self) -> Option<&ClassType> {
        match self {
            TypeDef::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumType> {
        match self {
            TypeDef::Enum(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassType {
    pub fqn: String,
    pub assembly: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "abstract", default)]
    pub is_abstract: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<Initializer>,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceType {
    pub fqn: String,
    pub assembly: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumType {
    pub fqn: String,
    pub assembly: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub members: Vec<EnumMemberDef>,
}

impl EnumType {
    pub fn has_member(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumMemberDef {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Initializer {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub variadic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    #[serde(rename = "static", default)]
    pub is_static: bool,
    #[serde(rename = "abstract", default)]
    pub is_abstract: bool,
    #[serde(rename = "async", default)]
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<String>,
    #[serde(rename = "static", default)]
    pub is_static: bool,
    #[serde(rename = "abstract", default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub immutable: bool,
    /// Initial slot value (constant when `immutable`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Either kind of declared member
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemberDef<'a> {
    Method(&'a Method),
    Property(&'a Property),
}

impl<'a> MemberDef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            MemberDef::Method(m) => &m.name,
            MemberDef::Property(p) => &p.name,
        }
    }

    pub fn is_static(&self) -> bool {
        match self {
            MemberDef::Method(m) => m.is_static,
            MemberDef::Property(p) => p.is_static,
        }
    }

    pub fn is_abstract(&self) -> bool {
        match self {
            MemberDef::Method(m) => m.is_abstract,
            MemberDef::Property(p) => p.is_abstract,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            MemberDef::Method(_) => "method",
            MemberDef::Property(_) => "property",
        }
    }

    /// Whether `self` may redeclare the inherited member `other`
    pub fn is_compatible_with(&self, other: &MemberDef<'_>) -> bool {
        match (self, other) {
            (MemberDef::Method(a), MemberDef::Method(b)) => {
                a.is_static == b.is_static
                    && a.is_async == b.is_async
                    && a.parameters.len() == b.parameters.len()
                    && a.returns == b.returns
            }
            (MemberDef::Property(a), MemberDef::Property(b)) => {
                a.is_static == b.is_static
                    && a.immutable == b.immutable
                    && a.type_ref == b.type_ref
            }
            _ => false,
        }
    }
}
