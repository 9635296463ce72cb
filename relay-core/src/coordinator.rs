//! 回调与 Promise 协调器
//!
//! Every host-initiated call runs as a task: a stack of parked continuations
//! plus a state. A task that reaches a host-overridden member enqueues a
//! callback and stops; the transport is never blocked. Completing the
//! callback resumes the task synchronously, and the host collects the final
//! result through the promise id it was handed.

use std::collections::{BTreeMap, HashMap, VecDeque};

use relay_config::{IdConfig, LimitConfig};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{debug, trace, warn};

use crate::codec::encode_ref;
use crate::error::{KernelError, KernelResult};
use crate::native::{guard, Continuation, MemberCall, NativeContext, Step};
use crate::router::{self, HostRequest, Route};
use crate::targets;
use crate::value::{ObjectRef, Value};

const CALLBACK_PREFIX: &str = "relay::callback::";
const PROMISE_PREFIX: &str = "relay::promise::";

/// Pending request from the kernel to the host, in wire form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Callback {
    pub cbid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoke: Option<InvokePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get: Option<GetPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<SetPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvokePayload {
    pub objref: Json,
    pub method: String,
    pub args: Vec<Json>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GetPayload {
    pub objref: Json,
    pub property: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetPayload {
    pub objref: Json,
    pub property: String,
    pub value: Json,
}

/// Result of a call that may have parked
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ready(Value),
    /// The call is waiting on the host; collect it with End
    Pending(String),
}

/// What End found
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Settled(Value),
    NotReady,
}

enum TaskState {
    Running,
    Waiting(u64),
    Ready,
    Settled(KernelResult<Value>),
}

struct Task {
    receiver: Option<ObjectRef>,
    frames: Vec<Continuation>,
    state: TaskState,
}

struct PendingCallback {
    task: u64,
    target: ObjectRef,
    wire: Callback,
}

/// 协调器
pub struct Coordinator {
    max_call_depth: usize,
    max_pump_steps: usize,
    next_task: u64,
    first_callback: u64,
    next_callback: u64,
    next_promise: u64,
    tasks: HashMap<u64, Task>,
    ready: VecDeque<u64>,
    pending: BTreeMap<u64, PendingCallback>,
    promises: HashMap<String, u64>,
}

impl Coordinator {
    pub fn new(limits: &LimitConfig, ids: &IdConfig) -> Self {
        Self {
            max_call_depth: limits.max_call_depth,
            max_pump_steps: limits.max_pump_steps,
            next_task: 0,
            first_callback: ids.callback_base,
            next_callback: ids.callback_base,
            next_promise: ids.promise_base,
            tasks: HashMap::new(),
            ready: VecDeque::new(),
            pending: BTreeMap::new(),
            promises: HashMap::new(),
        }
    }

    /// Run `call` as a new task; return its value or a promise id if it parked
    pub fn call(&mut self, ctx: &mut NativeContext<'_>, call: MemberCall) -> KernelResult<Outcome> {
        let id = self.spawn(ctx, call)?;
        match self.take_settled(id) {
            Some(result) => result.map(Outcome::Ready),
            None => Ok(Outcome::Pending(self.attach_promise(id))),
        }
    }

    /// Run `call` as a new task and always hand out a promise id
    pub fn begin(&mut self, ctx: &mut NativeContext<'_>, call: MemberCall) -> KernelResult<String> {
        let id = self.spawn(ctx, call)?;
        Ok(self.attach_promise(id))
    }

    fn spawn(&mut self, ctx: &mut NativeContext<'_>, call: MemberCall) -> KernelResult<u64> {
        let id = self.next_task;
        self.next_task += 1;
        debug!(target: targets::COORDINATOR, task = id, call = %call.label(), "task started");
        self.tasks.insert(
            id,
            Task {
                receiver: call.receiver().cloned(),
                frames: Vec::new(),
                state: TaskState::Running,
            },
        );
        let first = Step::Call {
            call,
            then: Box::new(|_, result| result.map(Step::Done)),
        };
        self.run(ctx, id, Ok(first))?;
        Ok(id)
    }

    fn attach_promise(&mut self, task: u64) -> String {
        let promiseid = format!("{PROMISE_PREFIX}{}", self.next_promise);
        self.next_promise += 1;
        self.promises.insert(promiseid.clone(), task);
        promiseid
    }

    fn take_settled(&mut self, id: u64) -> Option<KernelResult<Value>> {
        if !matches!(self.tasks.get(&id)?.state, TaskState::Settled(_)) {
            return None;
        }
        match self.tasks.remove(&id)?.state {
            TaskState::Settled(result) => Some(result),
            _ => None,
        }
    }

    fn task_mut(&mut self, id: u64) -> KernelResult<&mut Task> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| KernelError::Internal(format!("task {id} vanished while running")))
    }

    /// Drive a task until it settles, parks on the host, or yields
    fn run(
        &mut self,
        ctx: &mut NativeContext<'_>,
        id: u64,
        mut next: KernelResult<Step>,
    ) -> KernelResult<()> {
        loop {
            next = match next {
                Ok(Step::Done(value)) => match self.resume(ctx, id, Ok(value))? {
                    Some(step) => step,
                    None => return Ok(()),
                },
                Err(err) => match self.resume(ctx, id, Err(err))? {
                    Some(step) => step,
                    None => return Ok(()),
                },
                Ok(Step::Yield { then }) => {
                    let task = self.task_mut(id)?;
                    task.frames.push(then);
                    task.state = TaskState::Ready;
                    self.ready.push_back(id);
                    trace!(target: targets::COORDINATOR, task = id, "yielded");
                    return Ok(());
                }
                Ok(Step::Call { call, then }) => {
                    let limit = self.max_call_depth;
                    let task = self.task_mut(id)?;
                    task.frames.push(then);
                    if task.frames.len() > limit {
                        warn!(target: targets::COORDINATOR, task = id, limit, "call depth exceeded");
                        Err(KernelError::CallDepthExceeded { limit })
                    } else {
                        match router::route(ctx, call) {
                            Ok(Route::Native(step)) => Ok(step),
                            Ok(Route::Host(request)) => match self.enqueue(ctx, id, request) {
                                Ok(cbid) => {
                                    self.task_mut(id)?.state = TaskState::Waiting(cbid);
                                    return Ok(());
                                }
                                Err(err) => Err(err),
                            },
                            Err(err) => Err(err),
                        }
                    }
                }
            };
        }
    }

    /// Hand `result` to the innermost parked frame, or settle the task
    ///
    /// `Ok(None)` means the task settled.
    fn resume(
        &mut self,
        ctx: &mut NativeContext<'_>,
        id: u64,
        result: KernelResult<Value>,
    ) -> KernelResult<Option<KernelResult<Step>>> {
        let frame = self.task_mut(id)?.frames.pop();
        match frame {
            Some(frame) => Ok(Some(guard(|| frame(ctx, result)))),
            None => {
                self.settle(id, result)?;
                Ok(None)
            }
        }
    }

    fn settle(&mut self, id: u64, result: KernelResult<Value>) -> KernelResult<()> {
        debug!(target: targets::COORDINATOR, task = id, ok = result.is_ok(), "task settled");
        self.task_mut(id)?.state = TaskState::Settled(result);
        Ok(())
    }

    fn enqueue(
        &mut self,
        ctx: &NativeContext<'_>,
        task: u64,
        request: HostRequest,
    ) -> KernelResult<u64> {
        let codec = ctx.codec();
        let n = self.next_callback;
        let cbid = format!("{CALLBACK_PREFIX}{n}");
        let target = request.target().clone();
        let objref = encode_ref(&target);
        let wire = match request {
            HostRequest::Invoke {
                method,
                args,
                cookie,
                ..
            } => Callback {
                cbid,
                cookie,
                invoke: Some(InvokePayload {
                    objref,
                    method,
                    args: args
                        .iter()
                        .map(|a| codec.encode(a))
                        .collect::<KernelResult<_>>()?,
                }),
                get: None,
                set: None,
            },
            HostRequest::Get {
                property, cookie, ..
            } => Callback {
                cbid,
                cookie,
                invoke: None,
                get: Some(GetPayload { objref, property }),
                set: None,
            },
            HostRequest::Set {
                property,
                value,
                cookie,
                ..
            } => Callback {
                cbid,
                cookie,
                invoke: None,
                get: None,
                set: Some(SetPayload {
                    objref,
                    property,
                    value: codec.encode(&value)?,
                }),
            },
        };
        self.next_callback += 1;
        debug!(target: targets::COORDINATOR, task, cbid = %wire.cbid, "callback enqueued");
        self.pending.insert(n, PendingCallback { task, target, wire });
        Ok(n)
    }

    /// Pending callbacks in creation order; they stay pending until completed
    pub fn drain_pending(&self) -> Vec<Callback> {
        self.pending.values().map(|p| p.wire.clone()).collect()
    }

    /// Check that `cbid` names a callback that can still be completed
    ///
    /// Only the exact token handed out matches. Ids are issued in order and a
    /// callback leaves `pending` only through [`Coordinator::complete`], so
    /// an issued id that is no longer pending was already completed.
    pub fn check_callback(&self, cbid: &str) -> KernelResult<u64> {
        let unknown = || KernelError::UnknownCallback {
            cbid: cbid.to_string(),
        };
        let n = cbid
            .strip_prefix(CALLBACK_PREFIX)
            .and_then(|n| n.parse::<u64>().ok())
            .filter(|n| format!("{CALLBACK_PREFIX}{n}") == cbid)
            .ok_or_else(unknown)?;
        if self.pending.contains_key(&n) {
            Ok(n)
        } else if (self.first_callback..self.next_callback).contains(&n) {
            Err(KernelError::DuplicateComplete {
                cbid: cbid.to_string(),
            })
        } else {
            Err(unknown())
        }
    }

    /// Answer a callback and resume the task parked on it
    ///
    /// `Err(message)` is the host reporting a failure; the parked continuation
    /// receives it as a [`KernelError::CallbackFailed`].
    pub fn complete(
        &mut self,
        ctx: &mut NativeContext<'_>,
        cbid: &str,
        answer: Result<Value, String>,
    ) -> KernelResult<()> {
        let n = self.check_callback(cbid)?;
        let Some(callback) = self.pending.remove(&n) else {
            return Err(KernelError::Internal(format!("callback '{cbid}' disappeared")));
        };
        debug!(target: targets::COORDINATOR, %cbid, task = callback.task, ok = answer.is_ok(), "callback completed");

        let task = self.task_mut(callback.task)?;
        if !matches!(task.state, TaskState::Waiting(w) if w == n) {
            return Err(KernelError::Internal(format!(
                "task {} was not waiting on '{cbid}'",
                callback.task
            )));
        }
        task.state = TaskState::Running;
        let next = match answer {
            Ok(value) => Ok(Step::Done(value)),
            Err(message) => Err(KernelError::CallbackFailed { message }),
        };
        self.run(ctx, callback.task, next)
    }

    /// Run yielded tasks, at most `max_pump_steps` of them
    pub fn pump(&mut self, ctx: &mut NativeContext<'_>) -> KernelResult<usize> {
        let mut steps = 0;
        while steps < self.max_pump_steps {
            let Some(id) = self.ready.pop_front() else {
                break;
            };
            steps += 1;
            self.task_mut(id)?.state = TaskState::Running;
            self.run(ctx, id, Ok(Step::Done(Value::Null)))?;
        }
        if steps > 0 {
            trace!(target: targets::COORDINATOR, steps, remaining = self.ready.len(), "pumped");
        }
        Ok(steps)
    }

    /// Collect the result of a promise
    ///
    /// Returns [`Settlement::NotReady`] while the task is still waiting; a
    /// settled promise is consumed whether it succeeded or failed.
    pub fn end(&mut self, ctx: &mut NativeContext<'_>, promiseid: &str) -> KernelResult<Settlement> {
        let id = *self
            .promises
            .get(promiseid)
            .ok_or_else(|| KernelError::UnknownPromise {
                promiseid: promiseid.to_string(),
            })?;
        self.pump(ctx)?;
        match self.take_settled(id) {
            Some(result) => {
                self.promises.remove(promiseid);
                debug!(target: targets::COORDINATOR, %promiseid, ok = result.is_ok(), "promise ended");
                result.map(Settlement::Settled)
            }
            None => Ok(Settlement::NotReady),
        }
    }

    /// In-flight calls that involve `objref`
    ///
    /// A settled promise that has not been ended pins every object its
    /// result refers to.
    pub fn busy(&self, objref: &ObjectRef) -> usize {
        let tasks = self
            .tasks
            .values()
            .filter(|t| match &t.state {
                TaskState::Settled(result) => result.as_ref().is_ok_and(|v| v.refers_to(objref)),
                _ => t.receiver.as_ref() == Some(objref),
            })
            .count();
        let callbacks = self.pending.values().filter(|c| &c.target == objref).count();
        tasks + callbacks
    }

    pub fn pending_callbacks(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_promises(&self) -> usize {
        self.promises.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Assembly;
    use crate::native::Bindings;
    use crate::objects::{ObjectTable, StaticStore};
    use crate::registry::TypeRegistry;
    use crate::router::{validate_overrides, Override};
    use serde_json::json;

    struct Fixture {
        registry: TypeRegistry,
        objects: ObjectTable,
        statics: StaticStore,
        bindings: Bindings,
        coordinator: Coordinator,
    }

    impl Fixture {
        fn new(limits: LimitConfig) -> Self {
            let mut registry = TypeRegistry::new();
            let asm: Assembly = serde_json::from_value(json!({
                "name": "demo", "version": "1.0.0",
                "types": {
                    "demo.Echo": {
                        "kind": "class", "fqn": "demo.Echo", "assembly": "demo", "name": "Echo",
                        "properties": [{ "name": "tag", "type": "string" }],
                        "methods": [
                            { "name": "say", "parameters": [{ "name": "text" }] },
                            { "name": "shout", "parameters": [{ "name": "text" }] },
                            { "name": "slow" },
                            { "name": "recurse" }
                        ]
                    }
                }
            }))
            .unwrap();
            registry.load(asm).unwrap();

            let mut bindings = Bindings::new();
            bindings
                .method("demo.Echo", "say", |_, inv| Step::done(inv.string(0)?.to_string()))
                .method("demo.Echo", "shout", |_, inv| {
                    let this = inv.receiver()?.clone();
                    Step::call(MemberCall::invoke(&this, "say", inv.args.clone()), |_, said| {
                        let said = said?;
                        Step::done(format!("{}!", said.as_str().unwrap_or_default()))
                    })
                })
                .method("demo.Echo", "slow", |_, _| {
                    Step::yield_then(|_, _| Step::yield_then(|_, _| Step::done("finally")))
                })
                .method("demo.Echo", "recurse", |_, inv| {
                    let this = inv.receiver()?.clone();
                    Step::call(MemberCall::invoke(&this, "recurse", vec![]), |_, r| r.map(Step::Done))
                });

            Self {
                registry,
                objects: ObjectTable::new(10_000),
                statics: StaticStore::default(),
                bindings,
                coordinator: Coordinator::new(&limits, &IdConfig::default()),
            }
        }

        fn echo(&mut self, overrides: &[Override]) -> ObjectRef {
            let set = validate_overrides(&self.registry, "demo.Echo", overrides).unwrap();
            self.objects.allocate("demo.Echo", set)
        }

        fn with<T>(&mut self, f: impl FnOnce(&mut Coordinator, &mut NativeContext<'_>) -> T) -> T {
            let mut ctx = NativeContext::new(
                &self.registry,
                &mut self.objects,
                &mut self.statics,
                &self.bindings,
            );
            f(&mut self.coordinator, &mut ctx)
        }
    }

    #[test]
    fn test_native_call_is_ready_immediately() {
        let mut fx = Fixture::new(LimitConfig::default());
        let echo = fx.echo(&[]);
        let outcome = fx
            .with(|co, ctx| co.call(ctx, MemberCall::invoke(&echo, "shout", vec!["hi".into()])))
            .unwrap();
        assert_eq!(outcome, Outcome::Ready(Value::from("hi!")));
        assert_eq!(fx.coordinator.busy(&echo), 0);
    }

    #[test]
    fn test_override_parks_and_resumes_on_complete() {
        let mut fx = Fixture::new(LimitConfig::default());
        let echo = fx.echo(&[Override::method("say").with_cookie("c1")]);

        let outcome = fx
            .with(|co, ctx| co.call(ctx, MemberCall::invoke(&echo, "shout", vec!["hey".into()])))
            .unwrap();
        let Outcome::Pending(promiseid) = outcome else {
            panic!("expected a pending outcome");
        };
        assert_eq!(promiseid, "relay::promise::30000");
        assert_eq!(fx.coordinator.busy(&echo), 2);

        let pending = fx.coordinator.drain_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].cbid, "relay::callback::20000");
        assert_eq!(pending[0].cookie.as_deref(), Some("c1"));
        let invoke = pending[0].invoke.as_ref().unwrap();
        assert_eq!(invoke.method, "say");
        assert_eq!(invoke.args, vec![json!("hey")]);

        let not_yet = fx.with(|co, ctx| co.end(ctx, &promiseid)).unwrap();
        assert_eq!(not_yet, Settlement::NotReady);

        fx.with(|co, ctx| co.complete(ctx, "relay::callback::20000", Ok(Value::from("HEY"))))
            .unwrap();
        let done = fx.with(|co, ctx| co.end(ctx, &promiseid)).unwrap();
        assert_eq!(done, Settlement::Settled(Value::from("HEY!")));

        let again = fx.with(|co, ctx| co.end(ctx, &promiseid)).unwrap_err();
        assert_eq!(again.kind(), "UnknownPromise");
        assert_eq!(fx.coordinator.busy(&echo), 0);
    }

    #[test]
    fn test_complete_errors() {
        let mut fx = Fixture::new(LimitConfig::default());
        let echo = fx.echo(&[Override::method("say")]);
        fx.with(|co, ctx| co.begin(ctx, MemberCall::invoke(&echo, "say", vec!["x".into()])))
            .unwrap();

        let unknown = fx
            .with(|co, ctx| co.complete(ctx, "relay::callback::99", Ok(Value::Null)))
            .unwrap_err();
        assert_eq!(unknown.kind(), "UnknownCallback");

        fx.with(|co, ctx| co.complete(ctx, "relay::callback::20000", Ok(Value::Null)))
            .unwrap();
        let dup = fx
            .with(|co, ctx| co.complete(ctx, "relay::callback::20000", Ok(Value::Null)))
            .unwrap_err();
        assert_eq!(dup.kind(), "DuplicateComplete");
        let unissued = fx
            .with(|co, ctx| co.complete(ctx, "relay::callback::20001", Ok(Value::Null)))
            .unwrap_err();
        assert_eq!(unissued.kind(), "UnknownCallback");
    }

    #[test]
    fn test_cbid_must_match_exactly() {
        let mut fx = Fixture::new(LimitConfig::default());
        let echo = fx.echo(&[Override::method("say")]);
        fx.with(|co, ctx| co.begin(ctx, MemberCall::invoke(&echo, "say", vec!["x".into()])))
            .unwrap();

        for alias in ["relay::callback::+20000", "relay::callback::020000", "relay::callback::20000 "] {
            let err = fx.coordinator.check_callback(alias).unwrap_err();
            assert_eq!(err.kind(), "UnknownCallback", "{alias}");
        }
        assert_eq!(fx.coordinator.check_callback("relay::callback::20000").unwrap(), 20000);
        assert_eq!(fx.coordinator.pending_callbacks(), 1);
    }

    #[test]
    fn test_host_error_rejects_promise() {
        let mut fx = Fixture::new(LimitConfig::default());
        let echo = fx.echo(&[Override::method("say")]);
        let promiseid = fx
            .with(|co, ctx| co.begin(ctx, MemberCall::invoke(&echo, "shout", vec!["x".into()])))
            .unwrap();
        fx.with(|co, ctx| co.complete(ctx, "relay::callback::20000", Err("host blew up".into())))
            .unwrap();

        let err = fx.with(|co, ctx| co.end(ctx, &promiseid)).unwrap_err();
        assert_eq!(err.kind(), "CallbackFailed");
        assert_eq!(err.to_string(), "host blew up");
        assert_eq!(fx.coordinator.pending_promises(), 0);
    }

    #[test]
    fn test_callbacks_drain_in_creation_order() {
        let mut fx = Fixture::new(LimitConfig::default());
        let a = fx.echo(&[Override::method("say").with_cookie("a")]);
        let b = fx.echo(&[Override::property("tag").with_cookie("b")]);
        fx.with(|co, ctx| co.begin(ctx, MemberCall::invoke(&a, "say", vec!["1".into()])))
            .unwrap();
        fx.with(|co, ctx| co.begin(ctx, MemberCall::get(&b, "tag"))).unwrap();
        fx.with(|co, ctx| co.begin(ctx, MemberCall::set(&b, "tag", "v".into())))
            .unwrap();

        let cookies: Vec<_> = fx
            .coordinator
            .drain_pending()
            .into_iter()
            .map(|c| (c.cbid, c.cookie.unwrap_or_default(), c.invoke.is_some(), c.get.is_some(), c.set.is_some()))
            .collect();
        assert_eq!(
            cookies,
            vec![
                ("relay::callback::20000".to_string(), "a".to_string(), true, false, false),
                ("relay::callback::20001".to_string(), "b".to_string(), false, true, false),
                ("relay::callback::20002".to_string(), "b".to_string(), false, false, true),
            ]
        );
        // Draining does not consume.
        assert_eq!(fx.coordinator.drain_pending().len(), 3);
    }

    #[test]
    fn test_yielding_task_settles_through_pump() {
        let mut fx = Fixture::new(LimitConfig::default());
        let echo = fx.echo(&[]);
        let promiseid = fx
            .with(|co, ctx| co.begin(ctx, MemberCall::invoke(&echo, "slow", vec![])))
            .unwrap();
        let settled = fx.with(|co, ctx| co.end(ctx, &promiseid)).unwrap();
        assert_eq!(settled, Settlement::Settled(Value::from("finally")));
    }

    #[test]
    fn test_pump_is_bounded() {
        let mut fx = Fixture::new(LimitConfig {
            max_call_depth: 256,
            max_pump_steps: 1,
        });
        let echo = fx.echo(&[]);
        let promiseid = fx
            .with(|co, ctx| co.begin(ctx, MemberCall::invoke(&echo, "slow", vec![])))
            .unwrap();
        assert_eq!(fx.with(|co, ctx| co.end(ctx, &promiseid)).unwrap(), Settlement::NotReady);
        assert_eq!(
            fx.with(|co, ctx| co.end(ctx, &promiseid)).unwrap(),
            Settlement::Settled(Value::from("finally"))
        );
    }

    #[test]
    fn test_call_depth_is_limited() {
        let mut fx = Fixture::new(LimitConfig {
            max_call_depth: 16,
            max_pump_steps: 10,
        });
        let echo = fx.echo(&[]);
        let err = fx
            .with(|co, ctx| co.call(ctx, MemberCall::invoke(&echo, "recurse", vec![])))
            .unwrap_err();
        assert_eq!(err, KernelError::CallDepthExceeded { limit: 16 });
    }
}
