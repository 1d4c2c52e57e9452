// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Deterministic stand-in for `ai_worker.py`, used by the integration tests.
//!
//! Legacy mode (`<script> <w> <h> <c>`): reads `input_image.dat` from the
//! current directory, increments every byte and writes `output_image.dat`.
//! If `stub_no_output` exists in the current directory it exits without
//! writing.
//!
//! Daemon mode (`<script> --daemon ...`): speaks the framed JSON envelope.
//! Each start appends a line to `stub_spawns.log` in the current directory.
//! If `stub_refuse_handshake` exists it exits instead of answering ready.
//! `ANON`, `STRAY_READY` and `WRONG_ID` send malformed reply sequences.

use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use pybridge::framing;
use pybridge::worker::channel::shm_os_id;
use pybridge::worker::protocol::{self, HostMessage, Region, WorkerMessage};
use shared_memory::ShmemConf;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = if args.iter().any(|a| a == "--daemon") {
        run_daemon()
    } else {
        run_legacy(&args)
    };
    std::process::exit(code);
}

fn run_legacy(args: &[String]) -> i32 {
    let dims: Vec<u32> = args
        .iter()
        .skip(1)
        .filter_map(|a| a.parse().ok())
        .collect();
    let stderr = &mut std::io::stderr();

    if Path::new("stub_no_output").exists() {
        let _ = writeln!(stderr, "stub: refusing to write output");
        return 2;
    }

    let input = match framing::read_frame_file(Path::new("input_image.dat")) {
        Ok(input) => input,
        Err(e) => {
            let _ = writeln!(stderr, "stub: cannot read input: {}", e);
            return 1;
        }
    };
    let output: Vec<u8> = input.iter().map(|b| b.wrapping_add(1)).collect();
    if let Err(e) = framing::write_frame_file(Path::new("output_image.dat"), &output) {
        let _ = writeln!(stderr, "stub: cannot write output: {}", e);
        return 1;
    }

    let _ = writeln!(stderr, "stub: legacy pass complete");
    let mut stdout = std::io::stdout();
    let _ = writeln!(stdout, "processed {:?} ({} bytes)", dims, output.len());
    0
}

fn run_daemon() -> i32 {
    let stderr = &mut std::io::stderr();
    if let Ok(mut log) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open("stub_spawns.log")
    {
        let _ = writeln!(log, "{}", std::process::id());
    }

    let mut stdin = BufReader::new(std::io::stdin().lock());
    let mut stdout = BufWriter::new(std::io::stdout().lock());
    let mut session_key = String::new();

    loop {
        let message: HostMessage = match protocol::recv(&mut stdin) {
            Ok(message) => message,
            Err(_) => return 0,
        };
        match message {
            HostMessage::Handshake {
                session_key: key, ..
            } => {
                if Path::new("stub_refuse_handshake").exists() {
                    let _ = writeln!(stderr, "stub: refusing handshake");
                    return 3;
                }
                session_key = key;
                let _ = writeln!(stderr, "stub: ready for {}", session_key);
                if protocol::send(&mut stdout, &WorkerMessage::Ready).is_err() {
                    return 1;
                }
            }
            HostMessage::Execute {
                task_type,
                request_id,
                metadata,
                input,
                output,
            } => {
                let reply = match task_type.as_str() {
                    "ANON" => WorkerMessage::Done {
                        len: 0,
                        request_id: None,
                    },
                    "WRONG_ID" => error_reply("misrouted".to_string(), format!("{}-other", request_id)),
                    "STRAY_READY" => {
                        if protocol::send(&mut stdout, &WorkerMessage::Ready).is_err() {
                            return 1;
                        }
                        WorkerMessage::Done {
                            len: 0,
                            request_id: Some(request_id),
                        }
                    }
                    _ => execute(&task_type, &metadata, &input, &output, request_id, &session_key),
                };
                if protocol::send(&mut stdout, &reply).is_err() {
                    return 1;
                }
            }
            HostMessage::Shutdown => return 0,
        }
    }
}

fn execute(
    task_type: &str,
    metadata: &str,
    input: &Region,
    output: &Region,
    request_id: String,
    session_key: &str,
) -> WorkerMessage {
    match read_region(input) {
        Ok(data) => match run_task(task_type, metadata, &data, session_key) {
            Ok(result) => match write_region(output, &result) {
                Ok(()) => WorkerMessage::Done {
                    len: result.len(),
                    request_id: Some(request_id),
                },
                Err(e) => error_reply(format!("write failed: {}", e), request_id),
            },
            Err(e) => error_reply(e, request_id),
        },
        Err(e) => error_reply(format!("read failed: {}", e), request_id),
    }
}

fn error_reply(error: String, request_id: String) -> WorkerMessage {
    WorkerMessage::Error {
        error,
        request_id: Some(request_id),
    }
}

fn run_task(task_type: &str, metadata: &str, input: &[u8], session_key: &str) -> Result<Vec<u8>, String> {
    match task_type {
        "SENTIMENT" => Ok(br#"{"label":"POSITIVE"}"#.to_vec()),
        "ECHO" | "YOLO" | "EDGE_DETECT" => Ok(input.to_vec()),
        "LEN" => Ok(input.len().to_string().into_bytes()),
        "STATUS" => Ok(format!(
            r#"{{"status":"UP","worker":"stub","session_key":"{}"}}"#,
            session_key
        )
        .into_bytes()),
        "MATH_ADD" => {
            let nums: Vec<f64> = metadata
                .split_whitespace()
                .filter_map(|n| n.parse().ok())
                .collect();
            if nums.len() < 2 {
                return Ok(b"ERROR Missing arguments".to_vec());
            }
            Ok(format!("DONE Result: {:?}", nums[0] + nums[1]).into_bytes())
        }
        "REGRESSION" => {
            let points: Vec<pybridge::Point> =
                serde_json::from_slice(input).map_err(|e| e.to_string())?;
            let n = points.len() as f64;
            let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
            let (mx, my) = (sx / n, sy / n);
            let (num, den) = points.iter().fold((0.0, 0.0), |(num, den), p| {
                (num + (p.x - mx) * (p.y - my), den + (p.x - mx) * (p.x - mx))
            });
            if den == 0.0 {
                return Err("degenerate input".to_string());
            }
            let slope = num / den;
            Ok(format!(
                r#"{{"slope":{},"intercept":{}}}"#,
                slope,
                my - slope * mx
            )
            .into_bytes())
        }
        "HANG" => loop {
            std::thread::sleep(Duration::from_secs(60));
        },
        "CRASH" => std::process::exit(9),
        "FAIL" => Err("task failed on purpose".to_string()),
        other => Err(format!("Unknown task type: {}", other)),
    }
}

fn read_region(region: &Region) -> std::io::Result<Vec<u8>> {
    match region {
        Region::Shm { name, len } => {
            let mapping = ShmemConf::new()
                .os_id(shm_os_id(name))
                .open()
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            // SAFETY: the host does not touch the input mapping until it
            // reads the reply.
            let bytes = unsafe { mapping.as_slice() };
            bytes
                .get(..*len)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| std::io::Error::other("input shorter than declared"))
        }
        Region::File { path, .. } => framing::read_frame_file(path),
    }
}

fn write_region(region: &Region, data: &[u8]) -> std::io::Result<()> {
    match region {
        Region::Shm { name, len } => {
            if data.len() > *len {
                return Err(std::io::Error::other("output exceeds region capacity"));
            }
            let mut mapping = ShmemConf::new()
                .os_id(shm_os_id(name))
                .open()
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            // SAFETY: as above; the host reads only after the reply.
            let target = unsafe { mapping.as_slice_mut() };
            target
                .get_mut(..data.len())
                .ok_or_else(|| std::io::Error::other("output mapping too small"))?
                .copy_from_slice(data);
            Ok(())
        }
        Region::File { path, .. } => framing::write_frame_file(path, data),
    }
}
