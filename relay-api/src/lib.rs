//! Relay API - 内核协议层
//!
//! 提供：
//! - 协议类型（[`Request`] / [`Response`]）
//! - 请求分发（[`Dispatcher`]）
//! - 结构化错误报告（[`ErrorReport`]）
//! - 行协议服务循环（[`serve`]）

pub mod dispatcher;
pub mod error;
pub mod protocol;

use std::io::{self, BufRead, Write};

use relay_core::targets;
use serde::Serialize;
use tracing::{info, trace};

pub use dispatcher::Dispatcher;
pub use error::{ApiError, ErrorReport};
pub use protocol::{ErrorResponse, HelloResponse, OkResponse, Request, Response};

// 重新导出内核类型，方便宿主嵌入
pub use relay_config::KernelConfig;
pub use relay_core::{Kernel, KernelError};

/// Serve requests in strict lockstep until the reader is exhausted
///
/// Writes the hello line first, then exactly one response line per non-blank
/// request line. Lines that are not UTF-8 get a ProtocolError like any other
/// unparsable line. Returns the number of requests answered.
pub fn serve<R: BufRead, W: Write>(
    mut reader: R,
    mut writer: W,
    dispatcher: &mut Dispatcher,
) -> io::Result<u64> {
    write_line(&mut writer, &HelloResponse::current())?;
    info!(target: targets::DISPATCHER, version = relay_core::VERSION, "serving");

    let start = dispatcher.handled();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = buf.trim_ascii();
        if line.is_empty() {
            continue;
        }
        trace!(target: targets::DISPATCHER, line = %String::from_utf8_lossy(line), "<<");
        let response = dispatcher.handle_bytes(line);
        write_line(&mut writer, &response)?;
    }

    let answered = dispatcher.handled() - start;
    info!(target: targets::DISPATCHER, answered, "input closed");
    Ok(answered)
}

fn write_line<W: Write>(writer: &mut W, message: &impl Serialize) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, message)?;
    writer.write_all(b"\n")?;
    writer.flush()
}
