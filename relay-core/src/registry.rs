//! 类型注册表
//!
//! Holds every loaded assembly's types under their fully-qualified names.
//! Entries are immutable once loaded; a load either commits every type of a
//! manifest or none of them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{debug, info};

use crate::error::{KernelError, KernelResult};
use crate::manifest::{Assembly, MemberDef, TypeDef};
use crate::targets;

/// Bookkeeping for one loaded assembly
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedAssembly {
    pub name: String,
    pub version: String,
    pub targets: BTreeMap<String, serde_json::Value>,
    pub type_count: usize,
}

/// Result of a successful load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub assembly: String,
    pub types: usize,
}

/// A member found by name together with the type that declares it
#[derive(Debug, Clone, Copy)]
pub struct ResolvedMember<'a> {
    pub declaring_type: &'a str,
    pub member: MemberDef<'a>,
}

/// Read access to a set of type definitions
///
/// Implemented by the registry itself and by the staged view used while a
/// manifest is being validated, so both share one resolution algorithm.
trait TypeLookup {
    fn get(&self, fqn: &str) -> Option<&TypeDef>;
}

/// Loaded types plus the ones of a manifest being validated
struct StagedView<'a> {
    staged: &'a BTreeMap<String, TypeDef>,
    loaded: &'a HashMap<String, TypeDef>,
}

impl TypeLookup for StagedView<'_> {
    fn get(&self, fqn: &str) -> Option<&TypeDef> {
        self.staged.get(fqn).or_else(|| self.loaded.get(fqn))
    }
}

/// 类型注册表
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDef>,
    assemblies: BTreeMap<String, LoadedAssembly>,
}

impl TypeLookup for TypeRegistry {
    fn get(&self, fqn: &str) -> Option<&TypeDef> {
        self.types.get(fqn)
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every type of `manifest`, or none of them
    pub fn load(&mut self, manifest: Assembly) -> KernelResult<LoadSummary> {
        if let Some(existing) = self.assemblies.get(&manifest.name) {
            if existing.version == manifest.version {
                debug!(target: targets::REGISTRY, assembly = %manifest.name, "assembly already loaded");
                return Ok(LoadSummary {
                    assembly: existing.name.clone(),
                    types: existing.type_count,
                });
            }
            return Err(KernelError::schema(
                &manifest.name,
                format!(
                    "version {} is already loaded, cannot load {}",
                    existing.version, manifest.version
                ),
            ));
        }

        self.validate(&manifest)?;

        let Assembly {
            name,
            version,
            targets: naming,
            types,
        } = manifest;
        let type_count = types.len();
        self.types.extend(types);
        self.assemblies.insert(
            name.clone(),
            LoadedAssembly {
                name: name.clone(),
                version: version.clone(),
                targets: naming,
                type_count,
            },
        );

        info!(target: targets::REGISTRY, assembly = %name, %version, types = type_count, "assembly loaded");
        Ok(LoadSummary {
            assembly: name,
            types: type_count,
        })
    }

    /// 校验清单（不修改注册表）
    fn validate(&self, manifest: &Assembly) -> KernelResult<()> {
        let asm = manifest.name.as_str();
        let view = StagedView {
            staged: &manifest.types,
            loaded: &self.types,
        };

        for (key, def) in &manifest.types {
            if key != def.fqn() {
                return Err(KernelError::schema(
                    asm,
                    format!("type key '{key}' does not match its fqn '{}'", def.fqn()),
                ));
            }
            if def.assembly() != asm {
                return Err(KernelError::schema(
                    asm,
                    format!("type '{key}' claims to belong to assembly '{}'", def.assembly()),
                ));
            }
            if self.types.contains_key(key) {
                return Err(KernelError::schema(
                    asm,
                    format!("type '{key}' is already defined by another assembly"),
                ));
            }
            check_references(&view, asm, def)?;
            check_unique_members(asm, def)?;
        }

        for fqn in manifest.types.keys() {
            check_acyclic(&view, asm, fqn)?;
        }

        for def in manifest.types.values() {
            check_redeclarations(&view, asm, def)?;
            if let TypeDef::Class(class) = def {
                if !class.is_abstract {
                    let missing = abstract_members_in(&view, &class.fqn);
                    if !missing.is_empty() {
                        return Err(KernelError::schema(
                            asm,
                            format!(
                                "concrete class '{}' does not implement: {}",
                                class.fqn,
                                missing.into_iter().collect::<Vec<_>>().join(", ")
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// 查找类型
    pub fn lookup(&self, fqn: &str) -> KernelResult<&TypeDef> {
        self.types
            .get(fqn)
            .ok_or_else(|| KernelError::type_not_found(fqn))
    }

    /// Resolve `name` on `fqn`, its base chain, then its interfaces
    pub fn lookup_member(&self, fqn: &str, name: &str) -> KernelResult<ResolvedMember<'_>> {
        self.lookup(fqn)?;
        find_member(self, fqn, name).ok_or_else(|| KernelError::member_not_found(fqn, name))
    }

    /// Members that an instance of `fqn` must receive from overrides
    pub fn abstract_members(&self, fqn: &str) -> KernelResult<BTreeSet<String>> {
        self.lookup(fqn)?;
        Ok(abstract_members_in(self, fqn))
    }

    /// Class chain of `fqn`, most derived first
    pub fn ancestry(&self, fqn: &str) -> Vec<&str> {
        ancestry_of(self, fqn)
    }

    /// Check that `member` names a member of enum `fqn`
    pub fn enum_member(&self, fqn: &str, member: &str) -> KernelResult<()> {
        let def = self.lookup(fqn)?;
        let Some(enum_type) = def.as_enum() else {
            return Err(KernelError::TypeNotFound {
                fqn: fqn.to_string(),
                detail: Some(format!("'{fqn}' is a {}, not an enum", def.kind_name())),
            });
        };
        if enum_type.has_member(member) {
            Ok(())
        } else {
            Err(KernelError::member_not_found(fqn, member))
        }
    }

    /// Naming hints declared by an assembly
    pub fn naming(&self, assembly: &str) -> KernelResult<&BTreeMap<String, serde_json::Value>> {
        self.assemblies
            .get(assembly)
            .map(|a| &a.targets)
            .ok_or_else(|| KernelError::AssemblyNotFound {
                name: assembly.to_string(),
            })
    }

    pub fn assembly(&self, name: &str) -> Option<&LoadedAssembly> {
        self.assemblies.get(name)
    }

    /// 已加载的类型数量
    pub fn type_count(&self) -> usize {
        self.types.len()
    }
}

fn check_references(view: &impl TypeLookup, asm: &str, def: &TypeDef) -> KernelResult<()> {
    if let TypeDef::Class(class) = def {
        if let Some(base) = &class.base {
            match view.get(base) {
                Some(TypeDef::Class(_)) => {}
                Some(other) => {
                    return Err(KernelError::schema(
                        asm,
                        format!(
                            "base of '{}' must be a class, '{base}' is a {}",
                            class.fqn,
                            other.kind_name()
                        ),
                    ))
                }
                None => {
                    return Err(KernelError::schema(
                        asm,
                        format!("base '{base}' of '{}' does not resolve", class.fqn),
                    ))
                }
            }
        }
    }
    for iface in def.interfaces() {
        match view.get(iface) {
            Some(TypeDef::Interface(_)) => {}
            Some(other) => {
                return Err(KernelError::schema(
                    asm,
                    format!(
                        "'{}' lists '{iface}' as an interface, but it is a {}",
                        def.fqn(),
                        other.kind_name()
                    ),
                ))
            }
            None => {
                return Err(KernelError::schema(
                    asm,
                    format!("interface '{iface}' of '{}' does not resolve", def.fqn()),
                ))
            }
        }
    }
    Ok(())
}

fn check_unique_members(asm: &str, def: &TypeDef) -> KernelResult<()> {
    let mut seen = HashSet::new();
    let names = def
        .methods()
        .iter()
        .map(|m| m.name.as_str())
        .chain(def.properties().iter().map(|p| p.name.as_str()));
    for name in names {
        if !seen.insert(name) {
            return Err(KernelError::schema(
                asm,
                format!("member '{name}' is declared more than once on '{}'", def.fqn()),
            ));
        }
    }
    Ok(())
}

/// Depth-first walk over supertypes; a type reached again while still on the
/// stack closes a cycle.
fn check_acyclic(view: &impl TypeLookup, asm: &str, start: &str) -> KernelResult<()> {
    fn visit<'a>(
        view: &'a impl TypeLookup,
        fqn: &'a str,
        stack: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<(), String> {
        if done.contains(fqn) {
            return Ok(());
        }
        if stack.contains(&fqn) {
            stack.push(fqn);
            return Err(stack.join(" -> "));
        }
        let Some(def) = view.get(fqn) else {
            return Ok(());
        };
        stack.push(fqn);
        let base = def.as_class().and_then(|c| c.base.as_deref());
        for parent in base.into_iter().chain(def.interfaces().iter().map(String::as_str)) {
            visit(view, parent, stack, done)?;
        }
        stack.pop();
        done.insert(fqn);
        Ok(())
    }

    let mut stack = Vec::new();
    let mut done = HashSet::new();
    visit(view, start, &mut stack, &mut done)
        .map_err(|cycle| KernelError::schema(asm, format!("inheritance cycle: {cycle}")))
}

fn check_redeclarations(view: &impl TypeLookup, asm: &str, def: &TypeDef) -> KernelResult<()> {
    let declared = def
        .methods()
        .iter()
        .map(MemberDef::Method)
        .chain(def.properties().iter().map(MemberDef::Property));
    for member in declared {
        // Skip the type itself: the first entry of the resolution order.
        for parent in resolution_order(view, def.fqn()).into_iter().skip(1) {
            if let Some(inherited) = declared_member(parent, member.name()) {
                if !member.is_compatible_with(&inherited) {
                    return Err(KernelError::schema(
                        asm,
                        format!(
                            "'{}.{}' redeclares {} '{}.{}' with an incompatible signature",
                            def.fqn(),
                            member.name(),
                            inherited.kind_name(),
                            parent.fqn(),
                            inherited.name()
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn declared_member<'a>(def: &'a TypeDef, name: &str) -> Option<MemberDef<'a>> {
    if let Some(m) = def.methods().iter().find(|m| m.name == name) {
        return Some(MemberDef::Method(m));
    }
    def.properties()
        .iter()
        .find(|p| p.name == name)
        .map(MemberDef::Property)
}

fn ancestry_of<'a>(view: &'a impl TypeLookup, fqn: &str) -> Vec<&'a str> {
    let mut chain: Vec<&'a str> = Vec::new();
    let mut current = view.get(fqn).map(TypeDef::fqn);
    while let Some(name) = current {
        if chain.iter().any(|c| *c == name) {
            break;
        }
        let Some(def) = view.get(name) else {
            break;
        };
        chain.push(def.fqn());
        current = def.as_class().and_then(|c| c.base.as_deref());
    }
    chain
}

/// Type itself, its base chain, then every reachable interface breadth first
fn resolution_order<'a>(view: &'a impl TypeLookup, fqn: &str) -> Vec<&'a TypeDef> {
    let mut order: Vec<&TypeDef> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for name in ancestry_of(view, fqn) {
        if let Some(def) = view.get(name) {
            seen.insert(def.fqn());
            order.push(def);
        }
    }

    let mut queue: VecDeque<&str> = order
        .iter()
        .flat_map(|d| d.interfaces().iter().map(String::as_str))
        .collect();
    while let Some(name) = queue.pop_front() {
        if !seen.insert(name) {
            continue;
        }
        if let Some(def) = view.get(name) {
            queue.extend(def.interfaces().iter().map(String::as_str));
            order.push(def);
        }
    }
    order
}

fn find_member<'a>(
    view: &'a impl TypeLookup,
    fqn: &str,
    name: &str,
) -> Option<ResolvedMember<'a>> {
    resolution_order(view, fqn).into_iter().find_map(|def| {
        declared_member(def, name).map(|member| ResolvedMember {
            declaring_type: def.fqn(),
            member,
        })
    })
}

/// 抽象成员：最派生声明是抽象的，或仅由接口声明的实例成员
fn abstract_members_in(view: &impl TypeLookup, fqn: &str) -> BTreeSet<String> {
    let mut visited = HashSet::new();
    let mut missing = BTreeSet::new();
    for def in resolution_order(view, fqn) {
        let from_interface = matches!(def, TypeDef::Interface(_));
        let declared = def
            .methods()
            .iter()
            .map(MemberDef::Method)
            .chain(def.properties().iter().map(MemberDef::Property));
        for member in declared {
            if member.is_static() || !visited.insert(member.name()) {
                continue;
            }
            if from_interface || member.is_abstract() {
                missing.insert(member.name().to_string());
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(value: serde_json::Value) -> Assembly {
        serde_json::from_value(value).unwrap()
    }

    fn shapes() -> Assembly {
        manifest(json!({
            "name": "shapes",
            "version": "1.0.0",
            "targets": { "java": { "package": "org.shapes" } },
            "types": {
                "shapes.INamed": {
                    "kind": "interface", "fqn": "shapes.INamed", "assembly": "shapes", "name": "INamed",
                    "properties": [{ "name": "name", "type": "string" }]
                },
                "shapes.Shape": {
                    "kind": "class", "fqn": "shapes.Shape", "assembly": "shapes", "name": "Shape",
                    "abstract": true,
                    "interfaces": ["shapes.INamed"],
                    "methods": [
                        { "name": "area", "abstract": true, "returns": "number" },
                        { "name": "describe", "returns": "string" }
                    ]
                },
                "shapes.Square": {
                    "kind": "class", "fqn": "shapes.Square", "assembly": "shapes", "name": "Square",
                    "base": "shapes.Shape",
                    "properties": [{ "name": "name", "type": "string" }],
                    "methods": [{ "name": "area", "returns": "number" }]
                }
            }
        }))
    }

    #[test]
    fn test_load_and_lookup() {
        let mut reg = TypeRegistry::new();
        let summary = reg.load(shapes()).unwrap();
        assert_eq!(summary, LoadSummary { assembly: "shapes".into(), types: 3 });
        assert_eq!(reg.type_count(), 3);

        let area = reg.lookup_member("shapes.Square", "area").unwrap();
        assert_eq!(area.declaring_type, "shapes.Square");
        let describe = reg.lookup_member("shapes.Square", "describe").unwrap();
        assert_eq!(describe.declaring_type, "shapes.Shape");

        let err = reg.lookup_member("shapes.Square", "missing").unwrap_err();
        assert_eq!(err.kind(), "MemberNotFound");
        assert_eq!(reg.lookup("shapes.Nope").unwrap_err().kind(), "TypeNotFound");
    }

    #[test]
    fn test_abstract_members_and_ancestry() {
        let mut reg = TypeRegistry::new();
        reg.load(shapes()).unwrap();

        let missing = reg.abstract_members("shapes.Shape").unwrap();
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["area", "name"]);
        assert!(reg.abstract_members("shapes.Square").unwrap().is_empty());
        assert_eq!(reg.ancestry("shapes.Square"), vec!["shapes.Square", "shapes.Shape"]);
    }

    #[test]
    fn test_reload_same_version_is_idempotent() {
        let mut reg = TypeRegistry::new();
        reg.load(shapes()).unwrap();
        let again = reg.load(shapes()).unwrap();
        assert_eq!(again.types, 3);

        let mut newer = shapes();
        newer.version = "2.0.0".into();
        assert_eq!(reg.load(newer).unwrap_err().kind(), "SchemaError");
    }

    #[test]
    fn test_unresolved_base_leaves_registry_unchanged() {
        let mut reg = TypeRegistry::new();
        let bad = manifest(json!({
            "name": "bad", "version": "1.0.0",
            "types": {
                "bad.Ok": { "kind": "class", "fqn": "bad.Ok", "assembly": "bad", "name": "Ok" },
                "bad.Child": { "kind": "class", "fqn": "bad.Child", "assembly": "bad", "name": "Child", "base": "bad.Missing" }
            }
        }));
        let err = reg.load(bad).unwrap_err();
        assert_eq!(err.kind(), "SchemaError");
        assert_eq!(reg.type_count(), 0);
        assert!(reg.assembly("bad").is_none());
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut reg = TypeRegistry::new();
        let cyclic = manifest(json!({
            "name": "cyc", "version": "1.0.0",
            "types": {
                "cyc.A": { "kind": "interface", "fqn": "cyc.A", "assembly": "cyc", "name": "A", "interfaces": ["cyc.B"] },
                "cyc.B": { "kind": "interface", "fqn": "cyc.B", "assembly": "cyc", "name": "B", "interfaces": ["cyc.A"] }
            }
        }));
        let err = reg.load(cyclic).unwrap_err();
        assert!(err.to_string().contains("inheritance cycle"));
    }

    #[test]
    fn test_incompatible_redeclaration_is_rejected() {
        let mut reg = TypeRegistry::new();
        let bad = manifest(json!({
            "name": "redecl", "version": "1.0.0",
            "types": {
                "redecl.Base": {
                    "kind": "class", "fqn": "redecl.Base", "assembly": "redecl", "name": "Base",
                    "methods": [{ "name": "run", "parameters": [{ "name": "x" }] }]
                },
                "redecl.Child": {
                    "kind": "class", "fqn": "redecl.Child", "assembly": "redecl", "name": "Child",
                    "base": "redecl.Base",
                    "properties": [{ "name": "run" }]
                }
            }
        }));
        assert_eq!(reg.load(bad).unwrap_err().kind(), "SchemaError");
    }

    #[test]
    fn test_duplicate_member_and_concrete_gap() {
        let mut reg = TypeRegistry::new();
        let dup = manifest(json!({
            "name": "dup", "version": "1.0.0",
            "types": {
                "dup.A": {
                    "kind": "class", "fqn": "dup.A", "assembly": "dup", "name": "A",
                    "methods": [{ "name": "x" }], "properties": [{ "name": "x" }]
                }
            }
        }));
        assert!(reg.load(dup).unwrap_err().to_string().contains("more than once"));

        let gap = manifest(json!({
            "name": "gap", "version": "1.0.0",
            "types": {
                "gap.I": { "kind": "interface", "fqn": "gap.I", "assembly": "gap", "name": "I", "methods": [{ "name": "go" }] },
                "gap.C": { "kind": "class", "fqn": "gap.C", "assembly": "gap", "name": "C", "interfaces": ["gap.I"] }
            }
        }));
        assert!(reg.load(gap).unwrap_err().to_string().contains("does not implement: go"));
    }

    #[test]
    fn test_enum_member_and_naming() {
        let mut reg = TypeRegistry::new();
        reg.load(shapes()).unwrap();
        reg.load(manifest(json!({
            "name": "colors", "version": "0.1.0",
            "types": {
                "colors.Color": { "kind": "enum", "fqn": "colors.Color", "assembly": "colors", "name": "Color", "members": [{ "name": "RED" }] }
            }
        })))
        .unwrap();

        assert!(reg.enum_member("colors.Color", "RED").is_ok());
        assert_eq!(reg.enum_member("colors.Color", "PINK").unwrap_err().kind(), "MemberNotFound");
        assert_eq!(reg.enum_member("shapes.Square", "RED").unwrap_err().kind(), "TypeNotFound");

        let naming = reg.naming("shapes").unwrap();
        assert_eq!(naming["java"]["package"], "org.shapes");
        assert_eq!(reg.naming("nope").unwrap_err().kind(), "AssemblyNotFound");
    }
}
