//! 测试辅助工具
//!
//! 提供端到端测试的辅助函数：一个测试用原生库，以及按行驱动 `serve` 的会话

#![allow(dead_code)]

use std::path::PathBuf;

use relay_workspace::core::{Bindings, KernelError, MemberCall, NativeLibrary, Step};
use relay_workspace::{serve, Dispatcher, FileSource, Kernel, KernelConfig, Value};
use serde_json::Value as Json;

/// geo 程序集清单
pub const GEO_MANIFEST: &str = r#"{
  "name": "geo",
  "version": "0.1.0",
  "targets": { "python": { "module": "relay_geo" } },
  "types": {
    "geo.Named": {
      "kind": "class",
      "fqn": "geo.Named",
      "assembly": "geo",
      "name": "Named",
      "abstract": true,
      "properties": [{ "name": "label", "type": "string", "value": "unnamed" }],
      "methods": [
        { "name": "kind", "returns": "string", "abstract": true },
        { "name": "describe", "returns": "string" }
      ]
    },
    "geo.Point": {
      "kind": "class",
      "fqn": "geo.Point",
      "assembly": "geo",
      "name": "Point",
      "base": "geo.Named",
      "initializer": {
        "parameters": [
          { "name": "x", "type": "number" },
          { "name": "y", "type": "number" }
        ]
      },
      "properties": [
        { "name": "x", "type": "number", "immutable": true },
        { "name": "y", "type": "number", "immutable": true }
      ],
      "methods": [
        { "name": "kind", "returns": "string" },
        {
          "name": "distanceTo",
          "parameters": [{ "name": "other", "type": "geo.Point" }],
          "returns": "number"
        }
      ]
    }
  }
}"#;

/// 测试用原生库，清单从磁盘加载
pub struct GeoLibrary;

impl NativeLibrary for GeoLibrary {
    fn assembly(&self) -> &str {
        "geo"
    }

    fn bind(&self, b: &mut Bindings) {
        b.initializer("geo.Point", |ctx, this, args| {
            let mut args = args.into_iter();
            for axis in ["x", "y"] {
                let value = args.next().unwrap_or_default();
                if value.as_f64().is_none() {
                    return Err(KernelError::native(format!("geo.Point: {axis} must be a number")));
                }
                ctx.set_slot(this, axis, value)?;
            }
            Ok(())
        })
        .method("geo.Named", "describe", |_, inv| {
            let this = inv.receiver()?.clone();
            Step::call(MemberCall::get(&this, "label"), move |_, label| {
                let label = label?.as_str().unwrap_or_default().to_string();
                Step::call(MemberCall::invoke(&this, "kind", vec![]), move |_, kind| {
                    let kind = kind?;
                    Step::done(format!("{label} ({})", kind.as_str().unwrap_or_default()))
                })
            })
        })
        .method("geo.Point", "kind", |_, _| Step::done("point"))
        .method("geo.Point", "distanceTo", |ctx, inv| {
            let this = inv.receiver()?;
            let Some(other) = inv.arg(0).as_object() else {
                return Err(KernelError::malformed("distanceTo expects a geo.Point"));
            };
            let mut delta = [0.0f64; 2];
            for (i, axis) in ["x", "y"].into_iter().enumerate() {
                let a = ctx.slot(this, axis)?.as_f64().unwrap_or_default();
                let b = ctx.slot(other, axis)?.as_f64().unwrap_or_default();
                delta[i] = a - b;
            }
            Step::done(Value::Float(delta[0].hypot(delta[1])))
        });
    }
}

/// 为每个测试创建独立的清单目录
pub fn manifest_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("relay-e2e-{}-{}", tag, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("geo.json"), GEO_MANIFEST).unwrap();
    dir
}

/// 带内置库和 geo 库的内核
pub fn kernel(tag: &str) -> Kernel {
    let mut kernel =
        Kernel::with_builtins(KernelConfig::default()).with_source(FileSource::new(manifest_dir(tag)));
    kernel.register_library(&GeoLibrary);
    kernel
}

/// 通过 `serve` 跑完一组请求，返回全部输出行（第一行是 hello）
pub fn run_session(kernel: Kernel, requests: &[Json]) -> Vec<Json> {
    let input: String = requests.iter().map(|r| format!("{r}\n")).collect();
    let mut output = Vec::new();
    let mut dispatcher = Dispatcher::new(kernel);
    serve(input.as_bytes(), &mut output, &mut dispatcher).unwrap();

    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
