//! Relay Core - object reference runtime
//!
//! Holds the live object graph a host drives over the kernel protocol:
//! - Value model and wire codec
//! - Assembly manifests and the type registry
//! - Object table, override router, native bindings
//! - Callback/promise coordinator
//! - The [`Kernel`] runtime context tying them together

pub mod calc;
pub mod codec;
pub mod coordinator;
pub mod error;
pub mod kernel;
pub mod manifest;
pub mod native;
pub mod objects;
pub mod registry;
pub mod router;
pub mod source;
pub mod value;

/// Log targets, one per kernel component
///
/// Same strings as `relay_config::Phase::target()`, usable in `tracing`
/// macros which need them as constants.
pub mod targets {
    pub const REGISTRY: &str = "relay::registry";
    pub const OBJECTS: &str = "relay::objects";
    pub const ROUTER: &str = "relay::router";
    pub const COORDINATOR: &str = "relay::coordinator";
    pub const DISPATCHER: &str = "relay::dispatcher";
}

pub use calc::CalcLibrary;
pub use codec::Codec;
pub use coordinator::{Callback, Outcome, Settlement};
pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, Stats, BUILTIN_SCHEME};
pub use manifest::Assembly;
pub use native::{Bindings, Invocation, MemberCall, NativeContext, NativeLibrary, Step};
pub use registry::{LoadSummary, TypeRegistry};
pub use router::Override;
pub use source::{FileSource, LayeredSource, ManifestSource, MemorySource, SourceError};
pub use value::{EnumMember, Mapping, ObjectRef, Timestamp, Value};

/// 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use relay_config::Phase;

    #[test]
    fn test_targets_match_phases() {
        assert_eq!(super::targets::REGISTRY, Phase::Registry.target());
        assert_eq!(super::targets::OBJECTS, Phase::Objects.target());
        assert_eq!(super::targets::ROUTER, Phase::Router.target());
        assert_eq!(super::targets::COORDINATOR, Phase::Coordinator.target());
        assert_eq!(super::targets::DISPATCHER, Phase::Dispatcher.target());
    }
}
