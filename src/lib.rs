//! Relay - object reference kernel
//!
//! A host process in another language drives a live graph of native objects
//! through a line-oriented JSON protocol.
//!
//! # Architecture
//!
//! ```text
//! relay-config/  - Pure configuration data
//! relay-core/    - Values, registry, objects, router, coordinator, Kernel
//! relay-api/     - Wire protocol, dispatcher, serve loop
//! relay-cli/     - `relay` binary (stdio transport, logging)
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use relay_workspace::{serve, Dispatcher, Kernel, KernelConfig};
//!
//! let mut dispatcher = Dispatcher::new(Kernel::with_builtins(KernelConfig::default()));
//! serve(std::io::stdin().lock(), std::io::stdout(), &mut dispatcher)?;
//! ```

pub use relay_api as api;
pub use relay_config as config;
pub use relay_core as core;

// 重导出常用类型
pub use relay_api::{serve, ApiError, Dispatcher, ErrorReport, Request, Response};
pub use relay_config::{IdConfig, KernelConfig, LimitConfig, Phase};
pub use relay_core::{
    FileSource, Kernel, KernelError, KernelResult, NativeLibrary, ObjectRef, Override, Value,
    VERSION,
};
