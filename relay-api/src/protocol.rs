//! 协议类型
//!
//! One JSON object per line in each direction. Requests are tagged by `api`;
//! every request gets exactly one [`Response`].

use relay_core::Override;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A host request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "api", rename_all = "lowercase")]
pub enum Request {
    Load {
        name: String,
        version: String,
        /// Manifest location, e.g. `builtin://calc` or a path below the manifest root
        tarball: String,
    },
    Create {
        fqn: String,
        #[serde(default)]
        args: Vec<Json>,
        #[serde(default)]
        overrides: Vec<Override>,
    },
    Del {
        objref: Json,
    },
    Get {
        objref: Json,
        property: String,
    },
    #[serde(rename = "sget")]
    StaticGet {
        fqn: String,
        property: String,
    },
    Set {
        objref: Json,
        property: String,
        #[serde(default)]
        value: Json,
    },
    #[serde(rename = "sset")]
    StaticSet {
        fqn: String,
        property: String,
        #[serde(default)]
        value: Json,
    },
    Invoke {
        objref: Json,
        method: String,
        #[serde(default)]
        args: Vec<Json>,
    },
    #[serde(rename = "sinvoke")]
    StaticInvoke {
        fqn: String,
        method: String,
        #[serde(default)]
        args: Vec<Json>,
    },
    Begin {
        objref: Json,
        method: String,
        #[serde(default)]
        args: Vec<Json>,
    },
    End {
        promiseid: String,
    },
    Callbacks,
    Complete {
        cbid: String,
        #[serde(default)]
        err: Option<String>,
        #[serde(default)]
        result: Json,
    },
    Naming {
        assembly: String,
    },
    Stats,
}

impl Request {
    /// Wire name of the request kind
    pub fn api(&self) -> &'static str {
        match self {
            Request::Load { .. } => "load",
            Request::Create { .. } => "create",
            Request::Del { .. } => "del",
            Request::Get { .. } => "get",
            Request::StaticGet { .. } => "sget",
            Request::Set { .. } => "set",
            Request::StaticSet { .. } => "sset",
            Request::Invoke { .. } => "invoke",
            Request::StaticInvoke { .. } => "sinvoke",
            Request::Begin { .. } => "begin",
            Request::End { .. } => "end",
            Request::Callbacks => "callbacks",
            Request::Complete { .. } => "complete",
            Request::Naming { .. } => "naming",
            Request::Stats => "stats",
        }
    }
}

/// Successful reply
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OkResponse {
    pub ok: Json,
}

/// Failed reply
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable error kind, e.g. `ObjectNotFound`
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// First line written by the server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HelloResponse {
    pub hello: String,
}

impl HelloResponse {
    pub fn current() -> Self {
        Self {
            hello: format!("relay@{}", relay_core::VERSION),
        }
    }
}

/// Reply to one request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok(OkResponse),
    Error(ErrorResponse),
}

impl Response {
    pub fn ok(payload: Json) -> Self {
        Response::Ok(OkResponse { ok: payload })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_requests() {
        let req: Request = serde_json::from_value(json!({
            "api": "create",
            "fqn": "calc.Greeter",
            "overrides": [{ "method": "greet", "cookie": "c1" }]
        }))
        .unwrap();
        match &req {
            Request::Create { fqn, args, overrides } => {
                assert_eq!(fqn, "calc.Greeter");
                assert!(args.is_empty());
                assert_eq!(overrides[0], Override::method("greet").with_cookie("c1"));
            }
            other => panic!("unexpected request {other:?}"),
        }
        assert_eq!(req.api(), "create");

        let req: Request = serde_json::from_str(r#"{"api":"sget","fqn":"calc.Clock","property":"VERSION"}"#).unwrap();
        assert_eq!(req.api(), "sget");
        let req: Request = serde_json::from_str(r#"{"api":"callbacks"}"#).unwrap();
        assert_eq!(req, Request::Callbacks);
    }

    #[test]
    fn test_unknown_api_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"api":"shutdown"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"fqn":"x"}"#).is_err());
    }

    #[test]
    fn test_response_shapes() {
        let ok = serde_json::to_value(Response::ok(json!({ "result": 1 }))).unwrap();
        assert_eq!(ok, json!({ "ok": { "result": 1 } }));

        let err = serde_json::to_value(Response::Error(ErrorResponse {
            error: "boom".into(),
            name: "InternalError".into(),
            stack: None,
        }))
        .unwrap();
        assert_eq!(err, json!({ "error": "boom", "name": "InternalError" }));

        let hello = serde_json::to_value(HelloResponse::current()).unwrap();
        assert!(hello["hello"].as_str().unwrap().starts_with("relay@"));
    }
}
