use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::process::{Command as StdCommand, Stdio};
use std::thread;
use std::time::Duration;

use assert_cmd::prelude::*;
use predicates::ord::eq;
use predicates::str::{contains, is_empty, PredicateStrExt};
use tempfile::TempDir;

// `cachekv-client` with no args should exit with a non-zero code.
#[test]
fn client_cli_no_args() {
    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .assert()
        .failure();
}

#[test]
fn client_cli_invalid_subcommand() {
    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["unknown"])
        .assert()
        .failure();
}

// `cachekv-client -V` should print the version
#[test]
fn client_cli_version() {
    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["-V"])
        .assert()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

// `cachekv-server -V` should print the version
#[test]
fn server_cli_version() {
    StdCommand::cargo_bin("cachekv-server")
        .unwrap()
        .args(&["-V"])
        .assert()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn client_cli_invalid_get() {
    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["get"])
        .assert()
        .failure();

    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["get", "extra", "field"])
        .assert()
        .failure();

    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["get", "key", "--addr", "invalid-addr"])
        .assert()
        .failure();
}

#[test]
fn client_cli_invalid_set() {
    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["set"])
        .assert()
        .failure();

    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["set", "missing_field"])
        .assert()
        .failure();

    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["set", "key", "value", "--addr", "invalid-addr"])
        .assert()
        .failure();
}

#[test]
fn client_cli_invalid_rm() {
    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["rm"])
        .assert()
        .failure();

    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["rm", "key", "--addr", "invalid-addr"])
        .assert()
        .failure();
}

#[test]
fn server_cli_rejects_zero_threads() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    StdCommand::cargo_bin("cachekv-server")
        .unwrap()
        .args(&["--threads", "0", "--dir"])
        .arg(temp_dir.path().join("storage"))
        .assert()
        .failure()
        .stderr(contains("worker thread"));
}

#[test]
fn server_cli_rejects_bad_cache_size() {
    StdCommand::cargo_bin("cachekv-server")
        .unwrap()
        .args(&["--cache-size", "-1"])
        .assert()
        .failure();
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn cli_access_server_and_quit_from_console() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let addr = format!("127.0.0.1:{}", free_port());

    let mut server = StdCommand::cargo_bin("cachekv-server")
        .unwrap()
        .args(&["--addr", &addr, "--cache-size", "1", "--log-level", "warn", "--dir"])
        .arg(temp_dir.path().join("storage"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    thread::sleep(Duration::from_secs(1));

    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["set", "key1", "value1", "--addr", &addr])
        .assert()
        .success()
        .stdout(is_empty());

    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["get", "key1", "--addr", &addr])
        .assert()
        .success()
        .stdout(eq("value1").trim());

    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["set", "key2", "value2", "--addr", &addr])
        .assert()
        .success();

    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["get", "key1", "--addr", &addr])
        .assert()
        .success()
        .stdout(eq("value1").trim());

    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["rm", "key1", "--addr", &addr])
        .assert()
        .success()
        .stdout(is_empty());

    StdCommand::cargo_bin("cachekv-client")
        .unwrap()
        .args(&["get", "key1", "--addr", &addr])
        .assert()
        .success()
        .stdout(eq("Key not found").trim());

    let mut stdin = server.stdin.take().unwrap();
    let mut stdout = BufReader::new(server.stdout.take().unwrap());
    stdin.write_all(b"s\n").unwrap();
    stdin.flush().unwrap();
    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    assert_eq!(line, "Total number of inserts = 2\n");

    stdin.write_all(b"q\n").unwrap();
    drop(stdin);
    let status = server.wait().unwrap();
    assert!(status.success());

    // the cached value was written back on shutdown
    let stored = std::fs::read(temp_dir.path().join("storage").join("key2")).unwrap();
    assert_eq!(stored, b"value2".to_vec());
}
