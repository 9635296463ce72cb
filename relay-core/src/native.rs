//! 原生实现绑定
//!
//! Types live in manifests; their behavior lives in Rust closures registered
//! here by a [`NativeLibrary`]. Bindings are written in continuation-passing
//! style: instead of calling other members directly they return a [`Step`],
//! which lets the coordinator park a call whose target is implemented by the
//! host and resume it when the host answers.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::codec::Codec;
use crate::error::{KernelError, KernelResult};
use crate::objects::{ObjectTable, StaticStore};
use crate::registry::TypeRegistry;
use crate::router::OverrideSet;
use crate::value::{ObjectRef, Value};

/// Receives the outcome of a [`MemberCall`] and decides what happens next
pub type Continuation =
    Box<dyn FnOnce(&mut NativeContext<'_>, KernelResult<Value>) -> KernelResult<Step>>;

/// A bound method, getter or setter
pub type NativeFn = Rc<dyn Fn(&mut NativeContext<'_>, Invocation) -> KernelResult<Step>>;

/// A bound initializer; runs once on a freshly allocated instance
pub type InitializerFn =
    Rc<dyn Fn(&mut NativeContext<'_>, &ObjectRef, Vec<Value>) -> KernelResult<()>>;

/// What a native binding asks the coordinator to do
pub enum Step {
    /// The call finished with a value
    Done(Value),
    /// Perform `call`, then hand its result to `then`
    Call { call: MemberCall, then: Continuation },
    /// Reschedule: `then` runs on the next pump with a null input
    Yield { then: Continuation },
}

impl Step {
    pub fn done(value: impl Into<Value>) -> KernelResult<Step> {
        Ok(Step::Done(value.into()))
    }

    pub fn call<F>(call: MemberCall, then: F) -> KernelResult<Step>
    where
        F: FnOnce(&mut NativeContext<'_>, KernelResult<Value>) -> KernelResult<Step> + 'static,
    {
        Ok(Step::Call {
            call,
            then: Box::new(then),
        })
    }

    pub fn yield_then<F>(then: F) -> KernelResult<Step>
    where
        F: FnOnce(&mut NativeContext<'_>, KernelResult<Value>) -> KernelResult<Step> + 'static,
    {
        Ok(Step::Yield {
            then: Box::new(then),
        })
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Done(v) => f.debug_tuple("Done").field(v).finish(),
            Step::Call { call, .. } => f.debug_struct("Call").field("call", call).finish_non_exhaustive(),
            Step::Yield { .. } => f.debug_struct("Yield").finish_non_exhaustive(),
        }
    }
}

/// A member access issued by native code or by the host
#[derive(Debug, Clone, PartialEq)]
pub enum MemberCall {
    Invoke {
        target: ObjectRef,
        method: String,
        args: Vec<Value>,
    },
    Get {
        target: ObjectRef,
        property: String,
    },
    Set {
        target: ObjectRef,
        property: String,
        value: Value,
    },
    StaticInvoke {
        fqn: String,
        method: String,
        args: Vec<Value>,
    },
    StaticGet {
        fqn: String,
        property: String,
    },
    StaticSet {
        fqn: String,
        property: String,
        value: Value,
    },
}

impl MemberCall {
    pub fn invoke(target: &ObjectRef, method: &str, args: Vec<Value>) -> Self {
        MemberCall::Invoke {
            target: target.clone(),
            method: method.to_string(),
            args,
        }
    }

    pub fn get(target: &ObjectRef, property: &str) -> Self {
        MemberCall::Get {
            target: target.clone(),
            property: property.to_string(),
        }
    }

    pub fn set(target: &ObjectRef, property: &str, value: Value) -> Self {
        MemberCall::Set {
            target: target.clone(),
            property: property.to_string(),
            value,
        }
    }

    /// Instance the call is made on, if any
    pub fn receiver(&self) -> Option<&ObjectRef> {
        match self {
            MemberCall::Invoke { target, .. }
            | MemberCall::Get { target, .. }
            | MemberCall::Set { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Short `Type.member` label for logs
    pub fn label(&self) -> String {
        match self {
            MemberCall::Invoke { target, method, .. } => format!("{target}.{method}()"),
            MemberCall::Get { target, property } => format!("{target}.{property}"),
            MemberCall::Set { target, property, .. } => format!("{target}.{property}="),
            MemberCall::StaticInvoke { fqn, method, .. } => format!("{fqn}.{method}()"),
            MemberCall::StaticGet { fqn, property } => format!("{fqn}.{property}"),
            MemberCall::StaticSet { fqn, property, .. } => format!("{fqn}.{property}="),
        }
    }
}

/// Arguments handed to a native binding
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Receiver; `None` for static members
    pub this: Option<ObjectRef>,
    pub args: Vec<Value>,
}

static NULL: Value = Value::Null;

impl Invocation {
    /// Positional argument; missing optional arguments read as null
    pub fn arg(&self, index: usize) -> &Value {
        self.args.get(index).unwrap_or(&NULL)
    }

    pub fn receiver(&self) -> KernelResult<&ObjectRef> {
        self.this
            .as_ref()
            .ok_or_else(|| KernelError::Internal("instance member invoked without a receiver".into()))
    }

    pub fn number(&self, index: usize) -> KernelResult<f64> {
        let arg = self.arg(index);
        arg.as_f64().ok_or_else(|| {
            KernelError::malformed(format!(
                "argument {index} must be a number, got {}",
                arg.type_name()
            ))
        })
    }

    pub fn string(&self, index: usize) -> KernelResult<&str> {
        let arg = self.arg(index);
        arg.as_str().ok_or_else(|| {
            KernelError::malformed(format!(
                "argument {index} must be a string, got {}",
                arg.type_name()
            ))
        })
    }
}

/// Which accessor of a member a binding implements
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberKey {
    Method(String),
    Getter(String),
    Setter(String),
}

/// 原生函数注册表
#[derive(Default)]
pub struct Bindings {
    members: HashMap<(String, MemberKey), NativeFn>,
    initializers: HashMap<String, InitializerFn>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<F>(&mut self, fqn: &str, name: &str, f: F) -> &mut Self
    where
        F: Fn(&mut NativeContext<'_>, Invocation) -> KernelResult<Step> + 'static,
    {
        self.insert(fqn, MemberKey::Method(name.to_string()), Rc::new(f))
    }

    pub fn getter<F>(&mut self, fqn: &str, name: &str, f: F) -> &mut Self
    where
        F: Fn(&mut NativeContext<'_>, Invocation) -> KernelResult<Step> + 'static,
    {
        self.insert(fqn, MemberKey::Getter(name.to_string()), Rc::new(f))
    }

    /// The assigned value arrives as the first argument
    pub fn setter<F>(&mut self, fqn: &str, name: &str, f: F) -> &mut Self
    where
        F: Fn(&mut NativeContext<'_>, Invocation) -> KernelResult<Step> + 'static,
    {
        self.insert(fqn, MemberKey::Setter(name.to_string()), Rc::new(f))
    }

    pub fn initializer<F>(&mut self, fqn: &str, f: F) -> &mut Self
    where
        F: Fn(&mut NativeContext<'_>, &ObjectRef, Vec<Value>) -> KernelResult<()> + 'static,
    {
        self.initializers.insert(fqn.to_string(), Rc::new(f));
        self
    }

    fn insert(&mut self, fqn: &str, key: MemberKey, f: NativeFn) -> &mut Self {
        self.members.insert((fqn.to_string(), key), f);
        self
    }

    /// Nearest binding for `key` along a class chain, most derived first
    pub fn find(&self, ancestry: &[&str], key: &MemberKey) -> Option<NativeFn> {
        ancestry.iter().find_map(|fqn| {
            self.members
                .get(&(fqn.to_string(), key.clone()))
                .cloned()
        })
    }

    pub fn find_initializer(&self, ancestry: &[&str]) -> Option<InitializerFn> {
        ancestry
            .iter()
            .find_map(|fqn| self.initializers.get(*fqn).cloned())
    }

    /// 已注册的绑定数量（不含初始化器）
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.initializers.is_empty()
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindings")
            .field("members", &self.members.len())
            .field("initializers", &self.initializers.len())
            .finish()
    }
}

/// A set of native bindings plus, optionally, the manifest that declares them
pub trait NativeLibrary {
    /// Assembly name the bindings belong to
    fn assembly(&self) -> &str;

    /// Embedded manifest, served at `builtin://<assembly>`
    fn manifest(&self) -> Option<&str> {
        None
    }

    fn bind(&self, bindings: &mut Bindings);
}

/// Kernel state visible to native code while it runs
pub struct NativeContext<'a> {
    pub(crate) registry: &'a TypeRegistry,
    pub(crate) objects: &'a mut ObjectTable,
    pub(crate) statics: &'a mut StaticStore,
    pub(crate) bindings: &'a Bindings,
}

impl<'a> NativeContext<'a> {
    pub fn new(
        registry: &'a TypeRegistry,
        objects: &'a mut ObjectTable,
        statics: &'a mut StaticStore,
        bindings: &'a Bindings,
    ) -> Self {
        Self {
            registry,
            objects,
            statics,
            bindings,
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        self.registry
    }

    pub fn codec(&self) -> Codec<'_> {
        Codec::new(self.registry, self.objects)
    }

    /// Stored value of an instance slot; unset slots read as null
    pub fn slot(&self, objref: &ObjectRef, name: &str) -> KernelResult<Value> {
        Ok(self
            .objects
            .resolve(objref)?
            .slot(name)
            .cloned()
            .unwrap_or_default())
    }

    pub fn set_slot(&mut self, objref: &ObjectRef, name: &str, value: Value) -> KernelResult<()> {
        self.objects.resolve_mut(objref)?.set_slot(name, value);
        Ok(())
    }

    pub fn static_slot(&self, fqn: &str, name: &str) -> Value {
        self.statics.get(fqn, name).cloned().unwrap_or_default()
    }

    pub fn set_static_slot(&mut self, fqn: &str, name: &str, value: Value) {
        self.statics.set(fqn, name, value);
    }

    /// Construct a concrete class from native code, e.g. to return it
    pub fn construct(&mut self, fqn: &str, args: Vec<Value>) -> KernelResult<ObjectRef> {
        let def = self.registry.lookup(fqn)?;
        if def.as_class().is_none() {
            return Err(KernelError::TypeNotFound {
                fqn: fqn.to_string(),
                detail: Some(format!("a {} cannot be constructed", def.kind_name())),
            });
        }
        let missing = self.registry.abstract_members(fqn)?;
        if !missing.is_empty() {
            return Err(KernelError::AbstractType {
                fqn: fqn.to_string(),
                missing: missing.into_iter().collect(),
            });
        }
        self.instantiate(fqn, args, OverrideSet::default())
    }

    /// Allocate, seed slots from manifest defaults, run the initializer
    ///
    /// Type checks are the caller's job. On initializer failure the entry is
    /// removed again.
    pub(crate) fn instantiate(
        &mut self,
        fqn: &str,
        args: Vec<Value>,
        overrides: OverrideSet,
    ) -> KernelResult<ObjectRef> {
        let registry = self.registry;
        let ancestry = registry.ancestry(fqn);
        let codec = Codec::new(registry, self.objects);
        let mut seeds = Vec::new();
        for type_fqn in ancestry.iter().rev() {
            let def = registry.lookup(type_fqn)?;
            for prop in def.properties().iter().filter(|p| !p.is_static) {
                if let Some(initial) = &prop.value {
                    seeds.push((prop.name.clone(), codec.decode(initial)?));
                }
            }
        }
        let initializer = self.bindings.find_initializer(&ancestry);

        let objref = self.objects.allocate(fqn, overrides);
        let instance = self.objects.resolve_mut(&objref)?;
        for (name, value) in seeds {
            instance.set_slot(name, value);
        }

        if let Some(init) = initializer {
            if let Err(err) = guard(|| init(self, &objref, args)) {
                self.objects.delete(&objref)?;
                return Err(err);
            }
        }
        Ok(objref)
    }
}

/// Run native code, turning a panic into an internal error
pub(crate) fn guard<T>(f: impl FnOnce() -> KernelResult<T>) -> KernelResult<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(KernelError::Internal(format!(
            "native code panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Text carried by a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_walks_the_class_chain() {
        let mut bindings = Bindings::new();
        bindings
            .method("demo.Base", "run", |_, _| Step::done("base"))
            .method("demo.Child", "other", |_, _| Step::done(1i64));

        let key = MemberKey::Method("run".into());
        assert!(bindings.find(&["demo.Child", "demo.Base"], &key).is_some());
        assert!(bindings.find(&["demo.Child"], &key).is_none());
        assert_eq!(bindings.len(), 2);
    }

    #[test]
    fn test_invocation_arguments() {
        let inv = Invocation {
            this: None,
            args: vec![Value::Int(2), Value::from("x")],
        };
        assert_eq!(inv.number(0).unwrap(), 2.0);
        assert_eq!(inv.string(1).unwrap(), "x");
        assert!(inv.arg(5).is_null());
        assert_eq!(inv.number(1).unwrap_err().kind(), "MalformedValue");
        assert!(inv.receiver().unwrap_err().is_internal());
    }

    #[test]
    fn test_guard_catches_panics() {
        let err = guard::<()>(|| panic!("boom")).unwrap_err();
        assert!(err.is_internal());
        assert!(err.to_string().contains("boom"));
        assert_eq!(guard(|| Ok(3)).unwrap(), 3);
    }

    #[test]
    fn test_member_call_label() {
        let target: ObjectRef = "demo.A@1".parse().unwrap();
        assert_eq!(MemberCall::invoke(&target, "go", vec![]).label(), "demo.A@1.go()");
        assert_eq!(MemberCall::get(&target, "x").receiver(), Some(&target));
    }
}
