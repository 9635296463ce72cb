//! 测试辅助工具
//!
//! 以 JSON 行的形式驱动 Dispatcher，模拟宿主进程

#![allow(dead_code)]

use relay_api::{Dispatcher, Kernel, KernelConfig};
use serde_json::{json, Value as Json};

/// 模拟宿主会话
pub struct Session {
    dispatcher: Dispatcher,
}

impl Session {
    /// 已加载 calc 程序集的会话
    pub fn new() -> Self {
        let mut session = Self {
            dispatcher: Dispatcher::new(Kernel::with_builtins(KernelConfig::default())),
        };
        session.ok(json!({
            "api": "load",
            "name": "calc",
            "version": "1.0.0",
            "tarball": "builtin://calc"
        }));
        session
    }

    /// 发送一行请求，返回解析后的响应
    pub fn send(&mut self, request: Json) -> Json {
        let response = self.dispatcher.handle_line(&request.to_string());
        serde_json::to_value(response).unwrap()
    }

    /// 发送请求并断言成功，返回 `ok` 载荷
    pub fn ok(&mut self, request: Json) -> Json {
        let response = self.send(request.clone());
        assert!(
            response.get("ok").is_some(),
            "request {request} failed: {response}"
        );
        response["ok"].clone()
    }

    /// 发送请求并断言失败，返回错误名称
    pub fn fail(&mut self, request: Json) -> String {
        let response = self.send(request.clone());
        assert!(
            response.get("error").is_some(),
            "request {request} unexpectedly succeeded: {response}"
        );
        response["name"].as_str().unwrap().to_string()
    }

    /// 创建对象，返回 byref 对象
    pub fn create(&mut self, fqn: &str, args: Json, overrides: Json) -> Json {
        self.ok(json!({ "api": "create", "fqn": fqn, "args": args, "overrides": overrides }))
    }

    /// 取出唯一待处理回调
    pub fn single_callback(&mut self) -> Json {
        let callbacks = self.ok(json!({ "api": "callbacks" }))["callbacks"].clone();
        let callbacks = callbacks.as_array().unwrap();
        assert_eq!(callbacks.len(), 1, "expected one callback, got {callbacks:?}");
        callbacks[0].clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
