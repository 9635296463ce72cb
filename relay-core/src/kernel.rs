//! Kernel runtime context
//!
//! Owns every piece of process state: loaded types, live objects, static
//! slots, native bindings and in-flight tasks. One value is created at
//! startup and passed to whatever serves the host.

use std::collections::BTreeMap;

use relay_config::KernelConfig;
use serde::Serialize;
use tracing::{debug, info};

use crate::codec::Codec;
use crate::coordinator::{Callback, Coordinator, Outcome, Settlement};
use crate::error::{KernelError, KernelResult};
use crate::manifest::{Assembly, TypeDef};
use crate::native::{Bindings, MemberCall, NativeContext, NativeLibrary};
use crate::objects::{ObjectTable, StaticStore};
use crate::registry::{LoadSummary, TypeRegistry};
use crate::router::{validate_overrides, Override};
use crate::source::{LayeredSource, ManifestSource, MemorySource};
use crate::targets;
use crate::value::{ObjectRef, Value};

/// Scheme for manifests embedded by native libraries
pub const BUILTIN_SCHEME: &str = "builtin://";

/// Diagnostic counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub object_count: usize,
    pub type_count: usize,
    pub pending_callbacks: usize,
    pub pending_promises: usize,
}

/// 内核
pub struct Kernel {
    registry: TypeRegistry,
    objects: ObjectTable,
    statics: StaticStore,
    bindings: Bindings,
    coordinator: Coordinator,
    builtins: MemorySource,
    source: Box<dyn ManifestSource>,
}

impl Kernel {
    /// Kernel with no libraries and no manifest source
    pub fn new(config: KernelConfig) -> Self {
        let coordinator = Coordinator::new(&config.limits, &config.ids);
        Self {
            objects: ObjectTable::new(config.ids.object_base),
            registry: TypeRegistry::new(),
            statics: StaticStore::default(),
            bindings: Bindings::new(),
            coordinator,
            builtins: MemorySource::new(),
            source: Box::new(MemorySource::new()),
        }
    }

    /// Kernel with the built-in `calc` library registered
    pub fn with_builtins(config: KernelConfig) -> Self {
        let mut kernel = Self::new(config);
        kernel.register_library(&crate::calc::CalcLibrary);
        kernel
    }

    /// Where non-builtin manifest locations are resolved
    pub fn with_source(mut self, source: impl ManifestSource + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    /// Install a library's bindings and mount its embedded manifest
    ///
    /// The manifest is not loaded; the host still issues Load for it.
    pub fn register_library(&mut self, library: &dyn NativeLibrary) {
        library.bind(&mut self.bindings);
        if let Some(manifest) = library.manifest() {
            self.builtins
                .insert(format!("{BUILTIN_SCHEME}{}", library.assembly()), manifest);
        }
        info!(target: targets::REGISTRY, assembly = library.assembly(), "native library registered");
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn codec(&self) -> Codec<'_> {
        Codec::new(&self.registry, &self.objects)
    }

    fn split(&mut self) -> (&mut Coordinator, NativeContext<'_>) {
        let Kernel {
            registry,
            objects,
            statics,
            bindings,
            coordinator,
            ..
        } = self;
        (coordinator, NativeContext::new(registry, objects, statics, bindings))
    }

    /// Load an assembly from a manifest location
    pub fn load(&mut self, name: &str, version: &str, location: &str) -> KernelResult<LoadSummary> {
        let text = LayeredSource::new()
            .layer(&self.builtins)
            .layer(&*self.source)
            .fetch(location)
            .map_err(|e| KernelError::schema(name, e.to_string()))?;

        let manifest = Assembly::from_json(&text)
            .map_err(|e| KernelError::schema(name, format!("manifest is not valid JSON: {e}")))?;
        if manifest.name != name || manifest.version != version {
            return Err(KernelError::schema(
                name,
                format!(
                    "'{location}' contains {}@{}, expected {name}@{version}",
                    manifest.name, manifest.version
                ),
            ));
        }
        self.load_manifest(manifest)
    }

    pub fn load_manifest(&mut self, manifest: Assembly) -> KernelResult<LoadSummary> {
        self.registry.load(manifest)
    }

    /// Construct an instance, optionally with host-implemented members
    pub fn create(
        &mut self,
        fqn: &str,
        args: Vec<Value>,
        overrides: &[Override],
    ) -> KernelResult<ObjectRef> {
        let def = self.registry.lookup(fqn)?;
        if let TypeDef::Enum(_) = def {
            return Err(KernelError::TypeNotFound {
                fqn: fqn.to_string(),
                detail: Some("enums cannot be constructed".into()),
            });
        }

        let overrides = validate_overrides(&self.registry, fqn, overrides)?;
        let missing: Vec<String> = self
            .registry
            .abstract_members(fqn)?
            .into_iter()
            .filter(|member| !overrides.contains(member))
            .collect();
        if !missing.is_empty() {
            return Err(KernelError::AbstractType {
                fqn: fqn.to_string(),
                missing,
            });
        }

        let hooks = overrides.len();
        let (_, mut ctx) = self.split();
        let objref = ctx.instantiate(fqn, args, overrides)?;
        debug!(target: targets::OBJECTS, %objref, overrides = hooks, "created");
        Ok(objref)
    }

    /// Remove an instance; refused while calls involving it are in flight
    pub fn delete(&mut self, objref: &ObjectRef) -> KernelResult<()> {
        self.objects.resolve(objref)?;
        let pending = self.coordinator.busy(objref);
        if pending > 0 {
            return Err(KernelError::ObjectBusy {
                objref: objref.to_string(),
                pending,
            });
        }
        self.objects.delete(objref)?;
        Ok(())
    }

    pub fn get(&mut self, objref: &ObjectRef, property: &str) -> KernelResult<Outcome> {
        self.call(MemberCall::get(objref, property))
    }

    pub fn set(&mut self, objref: &ObjectRef, property: &str, value: Value) -> KernelResult<Outcome> {
        self.call(MemberCall::set(objref, property, value))
    }

    pub fn invoke(
        &mut self,
        objref: &ObjectRef,
        method: &str,
        args: Vec<Value>,
    ) -> KernelResult<Outcome> {
        self.call(MemberCall::invoke(objref, method, args))
    }

    pub fn static_get(&mut self, fqn: &str, property: &str) -> KernelResult<Outcome> {
        self.call(MemberCall::StaticGet {
            fqn: fqn.to_string(),
            property: property.to_string(),
        })
    }

    pub fn static_set(&mut self, fqn: &str, property: &str, value: Value) -> KernelResult<Outcome> {
        self.call(MemberCall::StaticSet {
            fqn: fqn.to_string(),
            property: property.to_string(),
            value,
        })
    }

    pub fn static_invoke(
        &mut self,
        fqn: &str,
        method: &str,
        args: Vec<Value>,
    ) -> KernelResult<Outcome> {
        self.call(MemberCall::StaticInvoke {
            fqn: fqn.to_string(),
            method: method.to_string(),
            args,
        })
    }

    fn call(&mut self, call: MemberCall) -> KernelResult<Outcome> {
        if let Some(target) = call.receiver() {
            self.objects.resolve(target)?;
        }
        let (coordinator, mut ctx) = self.split();
        coordinator.call(&mut ctx, call)
    }

    /// Start an asynchronous invocation; always returns a promise id
    pub fn begin(
        &mut self,
        objref: &ObjectRef,
        method: &str,
        args: Vec<Value>,
    ) -> KernelResult<String> {
        self.objects.resolve(objref)?;
        let (coordinator, mut ctx) = self.split();
        coordinator.begin(&mut ctx, MemberCall::invoke(objref, method, args))
    }

    /// Collect a promise's result, or learn that it is not settled yet
    pub fn end(&mut self, promiseid: &str) -> KernelResult<Settlement> {
        let (coordinator, mut ctx) = self.split();
        coordinator.end(&mut ctx, promiseid)
    }

    /// Pending host callbacks, after running any yielded work
    pub fn callbacks(&mut self) -> KernelResult<Vec<Callback>> {
        let (coordinator, mut ctx) = self.split();
        coordinator.pump(&mut ctx)?;
        Ok(coordinator.drain_pending())
    }

    /// Validate `cbid` before its result is decoded
    pub fn check_callback(&self, cbid: &str) -> KernelResult<()> {
        self.coordinator.check_callback(cbid).map(|_| ())
    }

    /// Answer a callback; the parked task resumes before this returns
    pub fn complete(&mut self, cbid: &str, answer: Result<Value, String>) -> KernelResult<()> {
        let (coordinator, mut ctx) = self.split();
        coordinator.complete(&mut ctx, cbid, answer)
    }

    pub fn naming(&self, assembly: &str) -> KernelResult<&BTreeMap<String, serde_json::Value>> {
        self.registry.naming(assembly)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            object_count: self.objects.count(),
            type_count: self.registry.type_count(),
            pending_callbacks: self.coordinator.pending_callbacks(),
            pending_promises: self.coordinator.pending_promises(),
        }
    }
}
