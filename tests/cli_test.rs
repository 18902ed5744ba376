use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use gdbtape_core::{Direction, SessionLog};
use gdbtape_repro::{begin_capture, PacketReceiver, PacketSender, ReproError, StreamTransport};
use tempfile::TempDir;

fn gdbtape(config: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_gdbtape"));
    cmd.arg("--config").arg(config);
    cmd
}

/// Spawn a listening command and return it with the address it printed.
fn spawn_listening(mut cmd: Command) -> (Child, String) {
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let mut line = String::new();
    BufReader::new(child.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    let addr = line.trim().strip_prefix("listening on ").unwrap().to_string();
    (child, addr)
}

/// Write an empty config and a one-turn reproducer; return (config, root).
fn fixture(tmp: &TempDir) -> (PathBuf, PathBuf) {
    let config = tmp.path().join("config.toml");
    std::fs::write(&config, "").unwrap();

    let root = tmp.path().join("repro");
    let mut writer = begin_capture(&root, false).unwrap();
    let log_path = writer.register("gdb-remote").unwrap();
    let mut log = SessionLog::new("gdb-remote");
    log.append(Direction::Sent, b"$?#3f".to_vec());
    log.append(Direction::Received, b"$S05#b8".to_vec());
    log.finalize_to(&log_path).unwrap();
    writer.keep().unwrap();

    (config, root)
}

#[test]
fn dump_prints_recorded_packets() {
    let tmp = TempDir::new().unwrap();
    let (config, root) = fixture(&tmp);

    let output = gdbtape(&config)
        .args(["dump", "--dir"])
        .arg(&root)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("# gdb-remote: 2 packets"));
    assert!(stdout.contains("send: $?#3f"));
    assert!(stdout.contains("read: $S05#b8"));
}

#[test]
fn serve_exits_distinctly_when_capture_runs_out() {
    let tmp = TempDir::new().unwrap();
    let (config, root) = fixture(&tmp);

    let mut cmd = gdbtape(&config);
    cmd.args(["serve", "--listen", "127.0.0.1:0", "--dir"]).arg(&root);
    let (child, addr) = spawn_listening(cmd);

    let mut client = StreamTransport::connect(addr.as_str()).unwrap();
    client.send_packet(b"$?#3f").unwrap();
    assert_eq!(client.receive_packet().unwrap(), b"$S05#b8");
    client.send_packet(b"$c#63").unwrap();
    assert!(matches!(
        client.receive_packet(),
        Err(ReproError::Disconnected)
    ));

    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("replay exhausted after 2 recorded packets"));
}

#[test]
fn serve_without_reproducer_fails() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("config.toml");
    std::fs::write(&config, "").unwrap();

    let output = gdbtape(&config)
        .args(["serve", "--listen", "127.0.0.1:0", "--dir"])
        .arg(tmp.path().join("absent"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("reproducer directory not found"));
}

#[test]
fn invalid_config_is_reported() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("config.toml");
    std::fs::write(&config, "[history]\ncapacity = 0\n").unwrap();

    let output = gdbtape(&config)
        .args(["dump", "--dir"])
        .arg(tmp.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("history.capacity"));
}

#[test]
fn proxy_capture_replays_in_a_fresh_process() {
    const TURNS: [(&[u8], &[u8]); 2] = [
        (b"$qSupported#37", b"$PacketSize=4000#a5"),
        (b"$?#3f", b"$S05#b8"),
    ];

    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("config.toml");
    std::fs::write(&config, "").unwrap();
    let root = tmp.path().join("repro");

    let stub_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let stub_addr = stub_listener.local_addr().unwrap();
    let stub = std::thread::spawn(move || {
        let (stream, _) = stub_listener.accept().unwrap();
        let mut stub = StreamTransport::from_tcp(stream).unwrap();
        for (request, response) in TURNS {
            assert_eq!(stub.receive_packet().unwrap(), request);
            stub.send_packet(response).unwrap();
        }
        // Wait for the proxy to hang up.
        while stub.receive_packet().is_ok() {}
    });

    let mut cmd = gdbtape(&config);
    cmd.args(["proxy", "--listen", "127.0.0.1:0", "--remote"])
        .arg(stub_addr.to_string())
        .arg("--dir")
        .arg(&root);
    let (proxy, addr) = spawn_listening(cmd);
    {
        let mut client = StreamTransport::connect(addr.as_str()).unwrap();
        for (request, response) in TURNS {
            client.send_packet(request).unwrap();
            assert_eq!(client.receive_packet().unwrap(), response);
        }
    }
    let output = proxy.wait_with_output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stderr).contains("reproducer written to"));
    stub.join().unwrap();

    let mut cmd = gdbtape(&config);
    cmd.args(["serve", "--listen", "127.0.0.1:0", "--dir"]).arg(&root);
    let (server, addr) = spawn_listening(cmd);
    let mut client = StreamTransport::connect(addr.as_str()).unwrap();
    for (request, response) in TURNS {
        client.send_packet(request).unwrap();
        assert_eq!(client.receive_packet().unwrap(), response);
    }
    client.send_packet(b"$c#63").unwrap();
    assert!(matches!(
        client.receive_packet(),
        Err(ReproError::Disconnected)
    ));

    let output = server.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr)
        .contains("replay exhausted after 4 recorded packets"));
}
