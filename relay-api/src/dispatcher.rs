//! Request dispatcher
//!
//! Maps each request kind to a kernel operation. Wire values are decoded
//! before the call and results encoded after it; every request produces
//! exactly one response.

use std::panic::{catch_unwind, AssertUnwindSafe};

use relay_core::codec::encode_ref;
use relay_core::native::panic_message;
use relay_core::{targets, Kernel, KernelError, KernelResult, Outcome, Settlement, Value};
use serde::Serialize;
use serde_json::{json, Map, Value as Json};
use tracing::{debug, error, trace, warn};

use crate::error::ApiError;
use crate::protocol::{Request, Response};

/// 请求分发器
pub struct Dispatcher {
    kernel: Kernel,
    handled: u64,
}

impl Dispatcher {
    pub fn new(kernel: Kernel) -> Self {
        Self { kernel, handled: 0 }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Number of requests answered so far
    pub fn handled(&self) -> u64 {
        self.handled
    }

    /// Parse and answer one request line
    pub fn handle_line(&mut self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request),
            Err(e) => self.reject(ApiError::Protocol(format!("invalid request: {e}"))),
        }
    }

    /// Raw request line as read from the transport
    pub fn handle_bytes(&mut self, line: &[u8]) -> Response {
        match std::str::from_utf8(line) {
            Ok(text) => self.handle_line(text),
            Err(_) => self.reject(ApiError::Protocol("request is not valid UTF-8".into())),
        }
    }

    fn reject(&mut self, err: ApiError) -> Response {
        self.handled += 1;
        let report = err.to_report(None);
        warn!(target: targets::DISPATCHER, %report, "rejected request line");
        Response::Error(report.to_response())
    }

    /// Answer one request
    pub fn handle(&mut self, request: Request) -> Response {
        let api = request.api();
        self.handled += 1;
        trace!(target: targets::DISPATCHER, ?request, "request");

        let result = catch_unwind(AssertUnwindSafe(|| self.dispatch(request))).unwrap_or_else(
            |payload| {
                Err(ApiError::Kernel(KernelError::Internal(format!(
                    "panic while handling {api}: {}",
                    panic_message(payload.as_ref())
                ))))
            },
        );

        match result {
            Ok(payload) => {
                debug!(target: targets::DISPATCHER, api, "ok");
                Response::ok(payload)
            }
            Err(err) => {
                let report = err.to_report(Some(api));
                if report.internal {
                    error!(target: targets::DISPATCHER, %report, "internal error");
                } else {
                    debug!(target: targets::DISPATCHER, %report, "error");
                }
                Response::Error(report.to_response())
            }
        }
    }

    fn dispatch(&mut self, request: Request) -> Result<Json, ApiError> {
        match request {
            Request::Load {
                name,
                version,
                tarball,
            } => {
                let summary = self.kernel.load(&name, &version, &tarball)?;
                Ok(json!({ "assembly": summary.assembly, "types": summary.types }))
            }

            Request::Create {
                fqn,
                args,
                overrides,
            } => {
                let args = self.decode_all(&args)?;
                let objref = self.kernel.create(&fqn, args, &overrides)?;
                Ok(encode_ref(&objref))
            }

            Request::Del { objref } => {
                let objref = self.kernel.codec().parse_objref(&objref)?;
                self.kernel.delete(&objref)?;
                Ok(json!({}))
            }

            Request::Get { objref, property } => {
                let objref = self.kernel.codec().parse_objref(&objref)?;
                let outcome = self.kernel.get(&objref, &property)?;
                self.answer(outcome, "value")
            }

            Request::StaticGet { fqn, property } => {
                let outcome = self.kernel.static_get(&fqn, &property)?;
                self.answer(outcome, "value")
            }

            Request::Set {
                objref,
                property,
                value,
            } => {
                let objref = self.kernel.codec().parse_objref(&objref)?;
                let value = self.decode(&value)?;
                let outcome = self.kernel.set(&objref, &property, value)?;
                Ok(acknowledge(outcome))
            }

            Request::StaticSet {
                fqn,
                property,
                value,
            } => {
                let value = self.decode(&value)?;
                let outcome = self.kernel.static_set(&fqn, &property, value)?;
                Ok(acknowledge(outcome))
            }

            Request::Invoke {
                objref,
                method,
                args,
            } => {
                let objref = self.kernel.codec().parse_objref(&objref)?;
                let args = self.decode_all(&args)?;
                let outcome = self.kernel.invoke(&objref, &method, args)?;
                self.answer(outcome, "result")
            }

            Request::StaticInvoke { fqn, method, args } => {
                let args = self.decode_all(&args)?;
                let outcome = self.kernel.static_invoke(&fqn, &method, args)?;
                self.answer(outcome, "result")
            }

            Request::Begin {
                objref,
                method,
                args,
            } => {
                let objref = self.kernel.codec().parse_objref(&objref)?;
                let args = self.decode_all(&args)?;
                let promiseid = self.kernel.begin(&objref, &method, args)?;
                Ok(json!({ "promiseid": promiseid }))
            }

            Request::End { promiseid } => match self.kernel.end(&promiseid)? {
                Settlement::Settled(value) => Ok(json!({ "result": self.encode(&value)? })),
                Settlement::NotReady => Ok(json!({ "promiseid": promiseid, "ready": false })),
            },

            Request::Callbacks => {
                let callbacks = self.kernel.callbacks()?;
                Ok(json!({ "callbacks": to_json(&callbacks)? }))
            }

            Request::Complete { cbid, err, result } => {
                // Unknown or repeated ids are reported before the result is looked at.
                self.kernel.check_callback(&cbid)?;
                let answer = match err {
                    Some(message) => Err(message),
                    None => Ok(self.decode(&result)?),
                };
                self.kernel.complete(&cbid, answer)?;
                Ok(json!({ "cbid": cbid }))
            }

            Request::Naming { assembly } => {
                let naming = self.kernel.naming(&assembly)?;
                Ok(json!({ "naming": to_json(naming)? }))
            }

            Request::Stats => to_json(self.kernel.stats()),
        }
    }

    fn decode(&self, json: &Json) -> KernelResult<Value> {
        self.kernel.codec().decode(json)
    }

    fn decode_all(&self, args: &[Json]) -> KernelResult<Vec<Value>> {
        let codec = self.kernel.codec();
        args.iter().map(|arg| codec.decode(arg)).collect()
    }

    fn encode(&self, value: &Value) -> KernelResult<Json> {
        self.kernel.codec().encode(value)
    }

    /// `{key: value}` when the call finished, `{promiseid}` when it parked
    fn answer(&self, outcome: Outcome, key: &str) -> Result<Json, ApiError> {
        match outcome {
            Outcome::Ready(value) => {
                let mut payload = Map::new();
                payload.insert(key.to_string(), self.encode(&value)?);
                Ok(Json::Object(payload))
            }
            Outcome::Pending(promiseid) => Ok(json!({ "promiseid": promiseid })),
        }
    }
}

fn acknowledge(outcome: Outcome) -> Json {
    match outcome {
        Outcome::Ready(_) => json!({}),
        Outcome::Pending(promiseid) => json!({ "promiseid": promiseid }),
    }
}

fn to_json(value: impl Serialize) -> Result<Json, ApiError> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::Kernel(KernelError::Internal(format!("cannot encode response: {e}"))))
}
