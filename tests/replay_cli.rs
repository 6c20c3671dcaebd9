//! Integration tests for the systate CLI.
//!
//! Each test writes a small JSON-lines trace into a temp dir and replays it
//! through the binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const TRACE: &str = r#"# two tasks on one cpu
{"name":"lttng_statedump_process_state","timestamp":1,"cpu":0,"fields":{"tid":42,"pid":42,"name":"dd"}}
{"name":"sched_switch","timestamp":10,"cpu":0,"fields":{"prev_tid":0,"next_tid":42,"next_comm":"dd"}}
{"name":"syscall_entry_openat","timestamp":20,"cpu":0,"fields":{"filename":"/data/blob","flags":0}}
{"name":"syscall_exit_openat","timestamp":21,"cpu":0,"fields":{"ret":3}}
{"name":"syscall_entry_read","timestamp":30,"cpu":0,"fields":{"fd":3,"count":4096}}
{"name":"block_rq_issue","timestamp":31,"cpu":0,"fields":{"dev":8,"sector":2048,"nr_sector":8,"tid":42,"rwbs":0}}
{"name":"irq_handler_entry","timestamp":40,"cpu":0,"fields":{"irq":41,"name":"nvme0q1"}}
{"name":"block_rq_complete","timestamp":41,"cpu":0,"fields":{"dev":8,"sector":2048,"nr_sector":8}}
{"name":"irq_handler_exit","timestamp":42,"cpu":0,"fields":{"irq":41,"ret":1}}
{"name":"syscall_exit_read","timestamp":50,"cpu":0,"fields":{"ret":4096}}
{"name":"net_dev_xmit","timestamp":55,"cpu":0,"fields":{"name":"eth0","len":1514}}
{"name":"sched_switch","timestamp":60,"cpu":0,"fields":{"prev_tid":42,"next_tid":0,"next_comm":"swapper/0"}}
"#;

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("Failed to write test file");
    path
}

/// Run systate with the given arguments, returning the full Output.
fn run_systate(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_systate"))
        .args(args)
        .output()
        .expect("Failed to run systate")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_table_output() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let trace = write_file(dir.path(), "trace.jsonl", TRACE);

    let output = run_systate(&[trace.to_str().unwrap()]);
    assert!(output.status.success(), "systate failed: {}", stderr(&output));

    let out = stdout(&output);
    for section in ["Processes", "CPUs", "Disks", "Interfaces", "Syscalls"] {
        assert!(out.contains(section), "missing {section} section:\n{out}");
    }
    assert!(out.contains("dd"), "process not listed:\n{out}");
    assert!(out.contains("(0,8)"), "disk not listed:\n{out}");
    assert!(out.contains("eth0"), "interface not listed:\n{out}");
    assert!(
        out.contains("Completions: 1 irq, 0 softirq, 2 syscall"),
        "unexpected completions:\n{out}"
    );
}

#[test]
fn test_json_output() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let trace = write_file(dir.path(), "trace.jsonl", TRACE);

    let output = run_systate(&["--format", "json", trace.to_str().unwrap()]);
    assert!(output.status.success(), "systate failed: {}", stderr(&output));

    let json: serde_json::Value =
        serde_json::from_str(&stdout(&output)).expect("Output is not valid JSON");
    let dd = &json["processes"][0];
    assert_eq!(dd["tid"], 42);
    assert_eq!(dd["cpu_ns"], 50);
    assert_eq!(dd["disk_read"], 4096);
    assert_eq!(dd["block_read"], 4096);

    let disk = &json["disks"][0];
    assert_eq!(disk["completed"], 1);
    assert_eq!(disk["bytes"], 4096);
    assert_eq!(disk["avg_sector_latency_ns"], 1.25);

    assert_eq!(json["cpus"][0]["busy_ns"], 50);
    assert!(json["cpus"][0]["current_tid"].is_null());
    assert_eq!(json["ifaces"][0]["send_bytes"], 1514);
    assert_eq!(json["completions"]["syscall"], 2);
}

#[test]
fn test_sector_size_override() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let trace = write_file(dir.path(), "trace.jsonl", TRACE);
    let config = write_file(dir.path(), "config.json", r#"{"sector_size": 4096}"#);

    let output = run_systate(&[
        "--format",
        "json",
        "--config",
        config.to_str().unwrap(),
        trace.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "systate failed: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["disks"][0]["bytes"], 8 * 4096);

    let output = run_systate(&[
        "--format",
        "json",
        "--config",
        config.to_str().unwrap(),
        "--sector-size",
        "1024",
        trace.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "systate failed: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["disks"][0]["bytes"], 8 * 1024);
}

#[test]
fn test_out_of_order_trace_fails() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let trace = write_file(
        dir.path(),
        "trace.jsonl",
        "{\"name\":\"sched_switch\",\"timestamp\":100,\"cpu\":0}\n\
         {\"name\":\"sched_switch\",\"timestamp\":90,\"cpu\":0}\n",
    );

    let output = run_systate(&[trace.to_str().unwrap()]);
    assert!(!output.status.success(), "out-of-order trace was accepted");
    assert!(
        stderr(&output).contains("goes back in time"),
        "unexpected error output: {}",
        stderr(&output)
    );
}

#[test]
fn test_bad_config_rejected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let trace = write_file(dir.path(), "trace.jsonl", TRACE);
    let config = write_file(dir.path(), "config.json", r#"{"sector_size": 0}"#);

    let output = run_systate(&["--config", config.to_str().unwrap(), trace.to_str().unwrap()]);
    assert!(!output.status.success(), "zero sector size was accepted");
    assert!(
        stderr(&output).contains("sector_size"),
        "unexpected error output: {}",
        stderr(&output)
    );
}

#[test]
fn test_missing_trace_fails() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let missing = dir.path().join("nope.jsonl");
    let output = run_systate(&[missing.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Failed to open trace"));
}
