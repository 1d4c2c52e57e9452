// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! pybridge: hand compute tasks from a managed host to a Python worker.
//!
//! A [`BridgeSession`] provisions an embedded Python runtime once per work
//! directory, starts a long-lived worker and dispatches tasks to it over a
//! framed JSON envelope, moving payloads through shared memory or framed
//! files. The [`legacy`] module keeps the older one-process-per-call file
//! protocol.
//!
//! ```no_run
//! use pybridge::{BridgeClient, BridgeConfig};
//!
//! let mut config = BridgeConfig::for_work_dir("/var/lib/pybridge");
//! config.source_script_dir = Some("/opt/app/python-core".into());
//! let client = BridgeClient::for_config(config);
//! client.initialize()?;
//! let label = client.analyze_sentiment("great product");
//! # Ok::<(), pybridge::BridgeError>(())
//! ```

pub mod backend;
pub mod bootstrap;
pub mod buffer;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod layout;
pub mod legacy;
pub mod session;
pub mod staging;
pub mod worker;

pub use backend::{Backend, BackendLauncher, Handshake, LaunchContext, TaskRequest};
pub use bootstrap::{
    Bootstrapper, ManifestState, PackageInstaller, PipInstaller, ProvisionOutcome,
    ProvisionedRuntime,
};
pub use buffer::HandoffBuffer;
pub use client::{BridgeClient, Point, StatusReport};
pub use config::{BridgeConfig, FastChannel, RuntimeConfig};
pub use dispatch::{dispatch, new_correlation_id};
pub use error::{BridgeError, DispatchError, Result};
pub use legacy::LegacyTransport;
pub use session::{BridgeSession, SessionRegistry, SessionState};
