//! 内核错误类型
//!
//! Every failure the kernel can report to the host. Variants map one-to-one to
//! the names carried by `ErrorResponse::name`.

use thiserror::Error;

/// Kernel result alias
pub type KernelResult<T> = Result<T, KernelError>;

/// Relay 内核错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    /// 程序集清单无效或不兼容
    #[error("invalid assembly '{assembly}': {reason}")]
    Schema { assembly: String, reason: String },

    #[error("type '{fqn}' not found{}", detail_suffix(.detail))]
    TypeNotFound { fqn: String, detail: Option<String> },

    #[error("cannot create abstract type '{fqn}': no override for {}", .missing.join(", "))]
    AbstractType { fqn: String, missing: Vec<String> },

    #[error("member '{member}' not found on type '{fqn}'")]
    MemberNotFound { fqn: String, member: String },

    /// 实例成员经由静态接口访问
    #[error("member '{fqn}.{member}' is not static")]
    NotStatic { fqn: String, member: String },

    /// 静态成员经由实例访问
    #[error("member '{fqn}.{member}' is static and cannot be accessed through an instance")]
    StaticMember { fqn: String, member: String },

    #[error("malformed override: {reason}")]
    MalformedOverride { reason: String },

    #[error("member '{member}' is already overridden for this object")]
    OverrideConflict { member: String },

    #[error("object '{objref}' not found")]
    ObjectNotFound { objref: String },

    #[error("malformed value: {reason}")]
    MalformedValue { reason: String },

    #[error("unknown callback '{cbid}'")]
    UnknownCallback { cbid: String },

    #[error("callback '{cbid}' was already completed")]
    DuplicateComplete { cbid: String },

    #[error("unknown promise '{promiseid}'")]
    UnknownPromise { promiseid: String },

    #[error("property '{fqn}.{property}' is read-only")]
    ReadOnlyProperty { fqn: String, property: String },

    /// 对象仍有进行中的调用
    #[error("object '{objref}' cannot be deleted: {pending} call(s) in flight")]
    ObjectBusy { objref: String, pending: usize },

    #[error("'{fqn}.{member}' has no native implementation")]
    NotImplemented { fqn: String, member: String },

    #[error("assembly '{name}' is not loaded")]
    AssemblyNotFound { name: String },

    /// 宿主回调返回错误
    #[error("{message}")]
    CallbackFailed { message: String },

    #[error("call depth limit of {limit} exceeded")]
    CallDepthExceeded { limit: usize },

    /// 原生实现报告的错误
    #[error("{message}")]
    Native { message: String },

    /// 内部不变量被破坏（实现缺陷）
    #[error("internal error: {0}")]
    Internal(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(" ({d})"),
        None => String::new(),
    }
}

impl KernelError {
    /// Shorthand for errors raised by native bindings
    pub fn native(message: impl Into<String>) -> Self {
        KernelError::Native {
            message: message.into(),
        }
    }

    pub fn schema(assembly: impl Into<String>, reason: impl Into<String>) -> Self {
        KernelError::Schema {
            assembly: assembly.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        KernelError::MalformedValue {
            reason: reason.into(),
        }
    }

    pub fn type_not_found(fqn: impl Into<String>) -> Self {
        KernelError::TypeNotFound {
            fqn: fqn.into(),
            detail: None,
        }
    }

    pub fn member_not_found(fqn: impl Into<String>, member: impl Into<String>) -> Self {
        KernelError::MemberNotFound {
            fqn: fqn.into(),
            member: member.into(),
        }
    }

    /// 获取稳定的错误名称
    pub fn kind(&self) -> &'static str {
        match self {
            KernelError::Schema { .. } => "SchemaError",
            KernelError::TypeNotFound { .. } => "TypeNotFound",
            KernelError::AbstractType { .. } => "AbstractTypeError",
            KernelError::MemberNotFound { .. } => "MemberNotFound",
            KernelError::NotStatic { .. } => "NotStatic",
            KernelError::StaticMember { .. } => "StaticMember",
            KernelError::MalformedOverride { .. } => "MalformedOverride",
            KernelError::OverrideConflict { .. } => "OverrideConflict",
            KernelError::ObjectNotFound { .. } => "ObjectNotFound",
            KernelError::MalformedValue { .. } => "MalformedValue",
            KernelError::UnknownCallback { .. } => "UnknownCallback",
            KernelError::DuplicateComplete { .. } => "DuplicateComplete",
            KernelError::UnknownPromise { .. } => "UnknownPromise",
            KernelError::ReadOnlyProperty { .. } => "ReadOnlyProperty",
            KernelError::ObjectBusy { .. } => "ObjectBusy",
            KernelError::NotImplemented { .. } => "NotImplemented",
            KernelError::AssemblyNotFound { .. } => "AssemblyNotFound",
            KernelError::CallbackFailed { .. } => "CallbackFailed",
            KernelError::CallDepthExceeded { .. } => "CallDepthExceeded",
            KernelError::Native { .. } => "NativeError",
            KernelError::Internal(_) => "InternalError",
        }
    }

    /// Whether the error signals a kernel bug rather than a host mistake
    pub fn is_internal(&self) -> bool {
        matches!(self, KernelError::Internal(_))
    }
}
