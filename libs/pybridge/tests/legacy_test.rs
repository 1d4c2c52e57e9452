// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Legacy file transport against the stub worker.

mod common;

use std::sync::Arc;

use pybridge::legacy::{INTERACTION_ERROR_PREFIX, MISSING_OUTPUT};
use pybridge::{BridgeClient, BridgeSession, HandoffBuffer, LegacyTransport, SessionState, framing};

use common::{spawn_count, stub_config, stub_worker};

#[test]
fn raw_call_increments_pixels_in_place() {
    let work = tempfile::tempdir().unwrap();
    let transport = LegacyTransport::new(work.path(), stub_worker());

    let mut pixels = [10u8, 20, 30, 40, 50, 255];
    let stdout = {
        let mut handoff = HandoffBuffer::wrap(&mut pixels);
        let stdout = transport.run_raw(&mut handoff, 2, 1, 3);
        assert_eq!(handoff.position(), 0);
        stdout
    };

    assert_eq!(pixels, [11, 21, 31, 41, 51, 0]);
    assert!(!stdout.is_empty());
    assert!(stdout.contains("processed [2, 1, 3] (6 bytes)"), "{stdout}");
    assert!(stdout.contains("stub: legacy pass complete"), "{stdout}");
}

#[test]
fn stale_output_is_never_returned() {
    let work = tempfile::tempdir().unwrap();
    let transport = LegacyTransport::new(work.path(), stub_worker());

    framing::write_frame_file(&work.path().join("output_image.dat"), &[99; 6]).unwrap();
    std::fs::write(work.path().join("stub_no_output"), "").unwrap();

    let mut buffer = HandoffBuffer::copy_from_slice(&[1, 2, 3, 4, 5, 6]);
    let result = transport.run_raw(&mut buffer, 2, 1, 3);

    assert_eq!(result, MISSING_OUTPUT);
    assert_eq!(buffer.as_slice(), &[1, 2, 3, 4, 5, 6]);
    assert!(!work.path().join("output_image.dat").exists());
}

#[test]
fn consecutive_calls_see_fresh_output() {
    let work = tempfile::tempdir().unwrap();
    let transport = LegacyTransport::new(work.path(), stub_worker());

    let mut buffer = HandoffBuffer::copy_from_slice(&[0, 0, 0]);
    transport.run_raw(&mut buffer, 1, 1, 3);
    transport.run_raw(&mut buffer, 1, 1, 3);
    assert_eq!(buffer.as_slice(), &[2, 2, 2]);
}

#[test]
fn session_raw_path_works_without_initialize() {
    let work = tempfile::tempdir().unwrap();
    let session = Arc::new(BridgeSession::new(stub_config(work.path())));
    let client = BridgeClient::new(Arc::clone(&session));

    let mut pixels = [1u8, 2, 3];
    let result = client.process_image_raw(&mut pixels, 1, 1, 3);
    assert!(!result.starts_with("Error"), "{result}");
    assert_eq!(pixels, [2, 3, 4]);
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert_eq!(spawn_count(work.path()), 0);

    session.initialize(None).unwrap();
    client.process_image_raw(&mut pixels, 1, 1, 3);
    assert_eq!(pixels, [3, 4, 5]);
}

#[test]
fn session_raw_path_survives_failed_handshake() {
    let work = tempfile::tempdir().unwrap();
    std::fs::write(work.path().join("stub_refuse_handshake"), "").unwrap();
    let session = Arc::new(BridgeSession::new(stub_config(work.path())));
    assert!(session.initialize(None).is_err());
    assert!(matches!(session.state(), SessionState::Failed(_)));

    let client = BridgeClient::new(Arc::clone(&session));
    let mut pixels = [1u8, 2, 3];
    let result = client.process_image_raw(&mut pixels, 1, 1, 3);
    assert!(!result.starts_with("Error"), "{result}");
    assert_eq!(pixels, [2, 3, 4]);
}

#[test]
fn session_raw_path_reports_invalid_configuration() {
    let work = tempfile::tempdir().unwrap();
    let mut config = stub_config(work.path());
    config.confidence = 2.0;
    let client = BridgeClient::new(Arc::new(BridgeSession::new(config)));

    let mut pixels = [1u8, 2, 3];
    let result = client.process_image_raw(&mut pixels, 1, 1, 3);
    assert!(result.starts_with(INTERACTION_ERROR_PREFIX), "{result}");
    assert_eq!(pixels, [1, 2, 3]);
}
