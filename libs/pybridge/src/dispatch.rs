// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Host-boundary dispatch: errors collapse to an absent result.

use std::path::Path;

use crate::session::{BridgeSession, SessionRegistry};

/// Fresh random correlation id (UUID v4, hyphenated).
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Dispatch through the registered session for `work_dir`.
///
/// `None` means "processing failed" without saying why: no session, session
/// not ready, worker crash, unknown task and task error all look the same
/// here. The reason is in the log under the correlation id.
pub fn dispatch(
    work_dir: &Path,
    task_type: &str,
    correlation_id: &str,
    metadata: &str,
    input: &[u8],
) -> Option<Vec<u8>> {
    let Some(session) = SessionRegistry::global().get(work_dir) else {
        tracing::warn!(
            request_id = %correlation_id,
            "No session registered for '{}'",
            work_dir.display()
        );
        return None;
    };
    dispatch_with(&session, task_type, correlation_id, metadata, input)
}

pub fn dispatch_with(
    session: &BridgeSession,
    task_type: &str,
    correlation_id: &str,
    metadata: &str,
    input: &[u8],
) -> Option<Vec<u8>> {
    session
        .dispatch(task_type, correlation_id, metadata, input)
        .inspect_err(|e| {
            tracing::debug!(request_id = %correlation_id, "{} -> absent: {}", task_type, e);
        })
        .ok()
}
