//! 覆盖路由
//!
//! Decides, per instance and member, whether an access runs natively or is
//! forwarded to the host as a callback.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{KernelError, KernelResult};
use crate::manifest::{MemberDef, Property};
use crate::native::{guard, Invocation, MemberCall, MemberKey, NativeContext, Step};
use crate::registry::{ResolvedMember, TypeRegistry};
use crate::targets;
use crate::value::{ObjectRef, Value};

/// Override declaration as sent by the host with a Create request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Override {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

impl Override {
    pub fn method(name: &str) -> Self {
        Self {
            method: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn property(name: &str) -> Self {
        Self {
            property: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn with_cookie(mut self, cookie: &str) -> Self {
        self.cookie = Some(cookie.to_string());
        self
    }
}

/// Validated overrides of one instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideSet {
    methods: BTreeMap<String, Option<String>>,
    properties: BTreeMap<String, Option<String>>,
}

impl OverrideSet {
    /// Cookie of the method override, if the method is overridden
    pub fn method(&self, name: &str) -> Option<Option<&str>> {
        self.methods.get(name).map(Option::as_deref)
    }

    pub fn property(&self, name: &str) -> Option<Option<&str>> {
        self.properties.get(name).map(Option::as_deref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name) || self.properties.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len() + self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Check every override against the type of `fqn`
///
/// Nothing is registered anywhere; the returned set is attached to the
/// instance only once construction succeeds.
pub fn validate_overrides(
    registry: &TypeRegistry,
    fqn: &str,
    specs: &[Override],
) -> KernelResult<OverrideSet> {
    let mut set = OverrideSet::default();
    for spec in specs {
        let (name, wants_method) = match (&spec.method, &spec.property) {
            (Some(m), None) => (m.as_str(), true),
            (None, Some(p)) => (p.as_str(), false),
            (Some(_), Some(_)) => {
                return Err(KernelError::MalformedOverride {
                    reason: "an override cannot name both a method and a property".into(),
                })
            }
            (None, None) => {
                return Err(KernelError::MalformedOverride {
                    reason: "an override must name a method or a property".into(),
                })
            }
        };

        let resolved = registry.lookup_member(fqn, name)?;
        let is_method = matches!(resolved.member, MemberDef::Method(_));
        if is_method != wants_method {
            return Err(KernelError::MalformedOverride {
                reason: format!(
                    "'{name}' is a {} of '{}'",
                    resolved.member.kind_name(),
                    resolved.declaring_type
                ),
            });
        }
        if resolved.member.is_static() {
            return Err(KernelError::MalformedOverride {
                reason: format!("static member '{}.{name}' cannot be overridden", resolved.declaring_type),
            });
        }
        if set.contains(name) {
            return Err(KernelError::OverrideConflict {
                member: name.to_string(),
            });
        }

        let table = if wants_method {
            &mut set.methods
        } else {
            &mut set.properties
        };
        table.insert(name.to_string(), spec.cookie.clone());
    }
    Ok(set)
}

/// A member access that must be answered by the host
#[derive(Debug, Clone, PartialEq)]
pub enum HostRequest {
    Invoke {
        target: ObjectRef,
        method: String,
        args: Vec<Value>,
        cookie: Option<String>,
    },
    Get {
        target: ObjectRef,
        property: String,
        cookie: Option<String>,
    },
    Set {
        target: ObjectRef,
        property: String,
        value: Value,
        cookie: Option<String>,
    },
}

impl HostRequest {
    pub fn target(&self) -> &ObjectRef {
        match self {
            HostRequest::Invoke { target, .. }
            | HostRequest::Get { target, .. }
            | HostRequest::Set { target, .. } => target,
        }
    }
}

/// Where an access ended up
#[derive(Debug)]
pub enum Route {
    /// Ran natively; the step says what happens next
    Native(Step),
    /// Forwarded to the host; the calling task must park
    Host(HostRequest),
}

/// Dispatch one member access
pub fn route(ctx: &mut NativeContext<'_>, call: MemberCall) -> KernelResult<Route> {
    trace!(target: targets::ROUTER, call = %call.label(), "routing");
    match call {
        MemberCall::Invoke {
            target,
            method,
            args,
        } => {
            let fqn = ctx.objects.resolve(&target)?.fqn().to_string();
            let resolved = instance_member(ctx.registry, &fqn, &method)?;
            expect_method(&resolved, &fqn, &method)?;
            let hooked = ctx
                .objects
                .resolve(&target)?
                .overrides()
                .method(&method)
                .map(|cookie| cookie.map(str::to_string));
            if let Some(cookie) = hooked {
                debug!(target: targets::ROUTER, %target, %method, "forwarding invoke to host");
                return Ok(Route::Host(HostRequest::Invoke {
                    target,
                    method,
                    args,
                    cookie,
                }));
            }
            let key = MemberKey::Method(method.clone());
            let Some(f) = ctx.bindings.find(&ctx.registry.ancestry(&fqn), &key) else {
                return Err(KernelError::NotImplemented {
                    fqn: resolved.declaring_type.to_string(),
                    member: method,
                });
            };
            let invocation = Invocation {
                this: Some(target),
                args,
            };
            guard(|| f(ctx, invocation)).map(Route::Native)
        }

        MemberCall::Get { target, property } => {
            let fqn = ctx.objects.resolve(&target)?.fqn().to_string();
            let resolved = instance_member(ctx.registry, &fqn, &property)?;
            expect_property(&resolved, &fqn, &property)?;
            let hooked = ctx
                .objects
                .resolve(&target)?
                .overrides()
                .property(&property)
                .map(|cookie| cookie.map(str::to_string));
            if let Some(cookie) = hooked {
                debug!(target: targets::ROUTER, %target, %property, "forwarding get to host");
                return Ok(Route::Host(HostRequest::Get {
                    target,
                    property,
                    cookie,
                }));
            }
            let key = MemberKey::Getter(property.clone());
            match ctx.bindings.find(&ctx.registry.ancestry(&fqn), &key) {
                Some(f) => {
                    let invocation = Invocation {
                        this: Some(target),
                        args: Vec::new(),
                    };
                    guard(|| f(ctx, invocation)).map(Route::Native)
                }
                None => Ok(Route::Native(Step::Done(ctx.slot(&target, &property)?))),
            }
        }

        MemberCall::Set {
            target,
            property,
            value,
        } => {
            let fqn = ctx.objects.resolve(&target)?.fqn().to_string();
            let resolved = instance_member(ctx.registry, &fqn, &property)?;
            let prop = expect_property(&resolved, &fqn, &property)?;
            if prop.immutable {
                return Err(KernelError::ReadOnlyProperty {
                    fqn: resolved.declaring_type.to_string(),
                    property,
                });
            }
            let hooked = ctx
                .objects
                .resolve(&target)?
                .overrides()
                .property(&property)
                .map(|cookie| cookie.map(str::to_string));
            if let Some(cookie) = hooked {
                debug!(target: targets::ROUTER, %target, %property, "forwarding set to host");
                return Ok(Route::Host(HostRequest::Set {
                    target,
                    property,
                    value,
                    cookie,
                }));
            }
            let key = MemberKey::Setter(property.clone());
            match ctx.bindings.find(&ctx.registry.ancestry(&fqn), &key) {
                Some(f) => {
                    let invocation = Invocation {
                        this: Some(target),
                        args: vec![value],
                    };
                    guard(|| f(ctx, invocation)).map(Route::Native)
                }
                None => {
                    ctx.set_slot(&target, &property, value)?;
                    Ok(Route::Native(Step::Done(Value::Null)))
                }
            }
        }

        MemberCall::StaticInvoke { fqn, method, args } => {
            let resolved = static_member(ctx.registry, &fqn, &method)?;
            expect_method(&resolved, &fqn, &method)?;
            let declaring = resolved.declaring_type.to_string();
            let key = MemberKey::Method(method.clone());
            let Some(f) = ctx.bindings.find(&[declaring.as_str()], &key) else {
                return Err(KernelError::NotImplemented {
                    fqn: declaring,
                    member: method,
                });
            };
            let invocation = Invocation { this: None, args };
            guard(|| f(ctx, invocation)).map(Route::Native)
        }

        MemberCall::StaticGet { fqn, property } => {
            let resolved = static_member(ctx.registry, &fqn, &property)?;
            let prop = expect_property(&resolved, &fqn, &property)?;
            let declaring = resolved.declaring_type.to_string();
            let key = MemberKey::Getter(property.clone());
            if let Some(f) = ctx.bindings.find(&[declaring.as_str()], &key) {
                let invocation = Invocation {
                    this: None,
                    args: Vec::new(),
                };
                return guard(|| f(ctx, invocation)).map(Route::Native);
            }
            let value = match ctx.statics.get(&declaring, &property) {
                Some(v) => v.clone(),
                None => match &prop.value {
                    Some(initial) => ctx.codec().decode(initial)?,
                    None => Value::Null,
                },
            };
            Ok(Route::Native(Step::Done(value)))
        }

        MemberCall::StaticSet {
            fqn,
            property,
            value,
        } => {
            let resolved = static_member(ctx.registry, &fqn, &property)?;
            let prop = expect_property(&resolved, &fqn, &property)?;
            let declaring = resolved.declaring_type.to_string();
            if prop.immutable {
                return Err(KernelError::ReadOnlyProperty {
                    fqn: declaring,
                    property,
                });
            }
            let key = MemberKey::Setter(property.clone());
            if let Some(f) = ctx.bindings.find(&[declaring.as_str()], &key) {
                let invocation = Invocation {
                    this: None,
                    args: vec![value],
                };
                return guard(|| f(ctx, invocation)).map(Route::Native);
            }
            ctx.statics.set(&declaring, &property, value);
            Ok(Route::Native(Step::Done(Value::Null)))
        }
    }
}

fn instance_member<'r>(
    registry: &'r TypeRegistry,
    fqn: &str,
    name: &str,
) -> KernelResult<ResolvedMember<'r>> {
    let resolved = registry.lookup_member(fqn, name)?;
    if resolved.member.is_static() {
        return Err(KernelError::StaticMember {
            fqn: resolved.declaring_type.to_string(),
            member: name.to_string(),
        });
    }
    Ok(resolved)
}

fn static_member<'r>(
    registry: &'r TypeRegistry,
    fqn: &str,
    name: &str,
) -> KernelResult<ResolvedMember<'r>> {
    let resolved = registry.lookup_member(fqn, name)?;
    if !resolved.member.is_static() {
        return Err(KernelError::NotStatic {
            fqn: fqn.to_string(),
            member: name.to_string(),
        });
    }
    Ok(resolved)
}

fn expect_method(resolved: &ResolvedMember<'_>, fqn: &str, name: &str) -> KernelResult<()> {
    match resolved.member {
        MemberDef::Method(_) => Ok(()),
        MemberDef::Property(_) => Err(KernelError::member_not_found(fqn, name)),
    }
}

fn expect_property<'r>(
    resolved: &ResolvedMember<'r>,
    fqn: &str,
    name: &str,
) -> KernelResult<&'r Property> {
    match resolved.member {
        MemberDef::Property(p) => Ok(p),
        MemberDef::Method(_) => Err(KernelError::member_not_found(fqn, name)),
    }
}
