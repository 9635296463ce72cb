//! API 错误类型
//!
//! 提供统一的错误类型和结构化错误报告。

use relay_core::KernelError;
use thiserror::Error;

use crate::protocol::ErrorResponse;

/// Relay API 错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// 请求行无法解析
    #[error("{0}")]
    Protocol(String),

    /// 内核操作失败
    #[error("{0}")]
    Kernel(#[from] KernelError),
}

impl ApiError {
    /// 获取错误名称（即 ErrorResponse 的 `name` 字段）
    pub fn name(&self) -> &'static str {
        match self {
            ApiError::Protocol(_) => "ProtocolError",
            ApiError::Kernel(e) => e.kind(),
        }
    }

    /// 转换为结构化错误报告
    ///
    /// `request` 是出错请求的 api 名称；请求行无法解析时为 `None`。
    pub fn to_report(&self, request: Option<&'static str>) -> ErrorReport {
        ErrorReport {
            request,
            error_kind: self.name(),
            message: self.to_string(),
            internal: matches!(self, ApiError::Kernel(e) if e.is_internal()),
        }
    }
}

/// 结构化错误报告
///
/// CLI 日志直接打印，协议层转换为 [`ErrorResponse`]。
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    /// 出错的请求类型: load, create, invoke ...
    pub request: Option<&'static str>,
    /// 错误类型（可用于程序化处理）
    pub error_kind: &'static str,
    /// 人类可读的错误消息
    pub message: String,
    /// 是否为内核缺陷
    pub internal: bool,
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.request {
            Some(request) => write!(f, "[{}] {}: {}", request, self.error_kind, self.message),
            None => write!(f, "[protocol] {}: {}", self.error_kind, self.message),
        }
    }
}

impl ErrorReport {
    /// 简洁格式（适合终端）
    pub fn to_short(&self) -> String {
        format!("{}: {}", self.error_kind, self.message)
    }

    /// Host-facing trace text
    pub fn stack(&self) -> String {
        format!(
            "{}\n    at {} request",
            self.to_short(),
            self.request.unwrap_or("unparsed")
        )
    }

    /// 转换为协议错误响应
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.message.clone(),
            name: self.error_kind.to_string(),
            stack: Some(self.stack()),
        }
    }
}
