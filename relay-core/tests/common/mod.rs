//! 测试辅助工具
//!
//! 提供内核级集成测试的辅助函数

#![allow(dead_code)]

use relay_config::KernelConfig;
use relay_core::{Callback, Kernel, Outcome, Settlement, Value};

/// 创建已加载 calc 程序集的内核
pub fn kernel() -> Kernel {
    let mut kernel = Kernel::with_builtins(KernelConfig::default());
    kernel
        .load("calc", "1.0.0", "builtin://calc")
        .expect("calc manifest should load");
    kernel
}

/// 断言调用立即完成并返回值
pub fn ready(outcome: Outcome) -> Value {
    match outcome {
        Outcome::Ready(value) => value,
        Outcome::Pending(promiseid) => panic!("expected a ready value, got promise {promiseid}"),
    }
}

/// 断言调用被挂起并返回 promise id
pub fn pending(outcome: Outcome) -> String {
    match outcome {
        Outcome::Pending(promiseid) => promiseid,
        Outcome::Ready(value) => panic!("expected a pending call, got {value:?}"),
    }
}

/// 断言 promise 已完成
pub fn settled(settlement: Settlement) -> Value {
    match settlement {
        Settlement::Settled(value) => value,
        Settlement::NotReady => panic!("promise is not settled"),
    }
}

/// 取出唯一的待处理回调
pub fn single_callback(kernel: &mut Kernel) -> Callback {
    let mut callbacks = kernel.callbacks().expect("callbacks should drain");
    assert_eq!(callbacks.len(), 1, "expected exactly one callback: {callbacks:?}");
    callbacks.remove(0)
}
