// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Typed convenience layer over a session.
//!
//! Every method generates its own correlation id and never surfaces an
//! absent result raw: byte-returning methods give `Option`, string-returning
//! methods substitute a documented `"ERROR: ..."` sentinel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffer::HandoffBuffer;
use crate::config::BridgeConfig;
use crate::dispatch::{dispatch_with, new_correlation_id};
use crate::error::Result;
use crate::session::{BridgeSession, SessionRegistry};

pub const SENTIMENT_FAILED: &str = "ERROR: Processing failed";
pub const REGRESSION_FAILED: &str = "ERROR: Regression failed";

/// Metadata for tasks without parameters.
pub const NO_METADATA: &str = "NONE";

/// Stand-in input for metadata-only tasks.
const PLACEHOLDER_INPUT: &[u8] = &[0];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Interpretation of a `STATUS` reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReport {
    /// Worker answered with a JSON object.
    Up(serde_json::Map<String, serde_json::Value>),
    /// Dispatch failed or the worker reported an error.
    Down { error: String },
    /// Worker answered with something other than a JSON object.
    Unknown { raw: String },
}

impl StatusReport {
    fn from_reply(reply: &str) -> Self {
        if reply.starts_with("ERROR") {
            return StatusReport::Down {
                error: reply.to_string(),
            };
        }
        match serde_json::from_str::<serde_json::Value>(reply) {
            Ok(serde_json::Value::Object(map)) => StatusReport::Up(map),
            _ => StatusReport::Unknown {
                raw: reply.to_string(),
            },
        }
    }

    /// JSON rendering used by the CLI and the FFI layer.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            StatusReport::Up(map) => serde_json::Value::Object(map.clone()),
            StatusReport::Down { error } => {
                serde_json::json!({"status": "DOWN", "error": error})
            }
            StatusReport::Unknown { raw } => {
                serde_json::json!({"status": "UNKNOWN", "raw": raw})
            }
        }
    }
}

#[derive(Clone)]
pub struct BridgeClient {
    session: Arc<BridgeSession>,
}

impl BridgeClient {
    pub fn new(session: Arc<BridgeSession>) -> Self {
        Self { session }
    }

    /// Client over the process-wide session for `config.work_dir`.
    pub fn for_config(config: BridgeConfig) -> Self {
        Self::new(SessionRegistry::global().get_or_create(config))
    }

    pub fn session(&self) -> &Arc<BridgeSession> {
        &self.session
    }

    pub fn initialize(&self) -> Result<()> {
        self.session.initialize(None)
    }

    pub fn execute(&self, task_type: &str, metadata: &str, input: &[u8]) -> Option<Vec<u8>> {
        let correlation_id = new_correlation_id();
        tracing::info!("Execute: {} | ID: {}", task_type, &correlation_id[..8]);
        dispatch_with(&self.session, task_type, &correlation_id, metadata, input)
    }

    pub fn detect_objects(&self, image: &[u8], width: u32, height: u32, channels: u32) -> Option<Vec<u8>> {
        self.execute("YOLO", &image_metadata(width, height, channels), image)
    }

    pub fn edge_detect(&self, image: &[u8], width: u32, height: u32, channels: u32) -> Option<Vec<u8>> {
        self.execute("EDGE_DETECT", &image_metadata(width, height, channels), image)
    }

    pub fn analyze_sentiment(&self, text: &str) -> String {
        match self.execute("SENTIMENT", NO_METADATA, text.as_bytes()) {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => SENTIMENT_FAILED.to_string(),
        }
    }

    pub fn regression(&self, points: &[Point]) -> String {
        let payload = match serde_json::to_vec(points) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode regression points: {}", e);
                return REGRESSION_FAILED.to_string();
            }
        };
        match self.execute("REGRESSION", "JSON", &payload) {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => REGRESSION_FAILED.to_string(),
        }
    }

    /// Metadata-only task with a placeholder input.
    pub fn send_task(&self, task_type: &str, metadata: &str) -> String {
        match self.execute(task_type, metadata, PLACEHOLDER_INPUT) {
            Some(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
            None => format!("ERROR: Task {} failed", task_type),
        }
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::from_reply(&self.send_task("STATUS", NO_METADATA))
    }

    /// Invoke a worker plugin. Task type is upper-cased, arguments are
    /// space-joined (`"NONE"` when empty).
    pub fn plugin<S: AsRef<str>>(&self, task_type: &str, args: &[S]) -> String {
        let metadata = args
            .iter()
            .map(|a| a.as_ref().trim())
            .filter(|a| !a.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let metadata = if metadata.is_empty() {
            NO_METADATA.to_string()
        } else {
            metadata
        };
        self.send_task(&task_type.to_uppercase(), &metadata)
    }

    /// Legacy slow path over a caller-owned pixel buffer, mutated in place.
    pub fn process_image_raw(&self, pixels: &mut [u8], width: u32, height: u32, channels: u32) -> String {
        let mut handoff = HandoffBuffer::wrap(pixels);
        self.session.run_raw(&mut handoff, width, height, channels)
    }
}

fn image_metadata(width: u32, height: u32, channels: u32) -> String {
    format!("{} {} {}", width, height, channels)
}
