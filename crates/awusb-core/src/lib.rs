//! AwUSB-Core: host side of the AW USB firmware-download link.
//!
//! This crate moves opaque firmware bytes and a small set of control
//! commands between an application and one attached download-mode device
//! over a pair of bulk endpoints.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, control codes, parameter block
//! - **Transport**: USB bulk abstraction (nusb, mock)
//! - **Session**: Device registry, attach/detach lifecycle, exclusive sessions
//! - **Engine**: Chunked, stall-tolerant write and read streams
//! - **Dispatch**: Single-shot control commands
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use awusb_core::{CancelToken, DeviceRegistry, EngineConfig, NusbTransport};
//!
//! let transport = NusbTransport::open().expect("no device");
//! let id = transport.id().clone();
//!
//! let registry = DeviceRegistry::new(EngineConfig::default());
//! registry.attach(id.clone(), Arc::new(transport)).expect("attach failed");
//!
//! let session = registry.open(&id).expect("open failed");
//! let image = std::fs::read("fes1.bin").expect("read failed");
//! session.write(&image, &CancelToken::new()).expect("write failed");
//! ```

pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod usermem;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use dispatch::{Command, Reply};
pub use error::{AwError, Result};
pub use events::{Direction, NullObserver, TracingObserver, TransferEvent, TransferObserver};
pub use protocol::{CommandCode, CommandHeader, ParamBlock};
pub use session::{Device, DeviceId, DeviceRegistry, Session};
pub use transport::{
    BulkTransport, EndpointInfo, EndpointProvider, MockStep, MockTransport, NusbTransport,
    TransportError, UsbHandle,
};
pub use usermem::{BoundaryFault, UserSink, UserSource};
