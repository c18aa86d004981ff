use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chatroom_relay");

    let mut server = spawn_server(&binary).await?;
    let (host, port) = read_server_addr(&mut server.stdout).await?;

    let mut alice = spawn_client(&binary, "alice", &host, &port).await?;
    // Alice has to be registered before Bob announces himself.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut bob = spawn_client(&binary, "bob", &host, &port).await?;

    let alice_sees_bob =
        read_line_expect(&mut alice.stdout, "waiting for alice join notice").await?;
    assert_eq!(alice_sees_bob, "Server: bob has joined the chat.");

    // Alice greets Bob; the relay does not echo it back to her.
    alice.send_line("Hello from Alice").await.context("alice send line")?;
    let bob_hears_alice =
        read_line_expect(&mut bob.stdout, "waiting for bob to hear alice").await?;
    assert_eq!(bob_hears_alice, "alice: Hello from Alice");

    bob.send_line("Hi Alice!").await.context("bob send line")?;
    let alice_hears_bob =
        read_line_expect(&mut alice.stdout, "waiting for alice to hear bob").await?;
    assert_eq!(alice_hears_bob, "bob: Hi Alice!");

    // Alice quits; Bob receives the departure notice.
    alice.send_line("Quit").await.context("alice send quit")?;
    let alice_quit =
        read_line_expect(&mut alice.stdout, "waiting for alice quit confirmation").await?;
    assert_eq!(alice_quit, "Quitting...");
    ensure_success(&mut alice.child, "alice client").await?;

    let bob_sees_departure =
        read_line_expect(&mut bob.stdout, "waiting for bob to see alice leave").await?;
    assert_eq!(bob_sees_departure, "Server: alice has left the chat.");

    // The operator stops the server; Bob notices and exits on his own.
    server.send_line("q").await.context("operator quit")?;
    let bob_lost =
        read_line_expect(&mut bob.stdout, "waiting for bob to lose the server").await?;
    assert_eq!(bob_lost, "We have lost connection to the server!");
    ensure_success(&mut bob.child, "bob client").await?;

    let server_log = tokio::spawn(drain_stdout(server.stdout));
    ensure_success(&mut server.child, "relay server").await?;
    let _ = server_log.await;

    Ok(())
}

#[tokio::test]
async fn bind_failure_exits_with_error() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chatroom_relay");
    let occupied = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = occupied.local_addr()?.port().to_string();

    let output = timeout(
        READ_TIMEOUT,
        Command::new(binary)
            .args(["server", "127.0.0.1", "-p", &port])
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .context("server did not exit after failing to bind")??;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(&format!("failed to bind 127.0.0.1:{port}")),
        "unexpected diagnostic: {stderr}"
    );
    Ok(())
}

struct ChildProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ChildProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

async fn spawn_server(binary: &Path) -> Result<ChildProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdin = child.stdin.take().context("server stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok(ChildProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    })
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<(String, String)> {
    let line = read_line(reader)
        .await?
        .context("server did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected server banner format")?;
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("server banner missing socket: {trimmed}"))?;
    Ok((host.to_string(), port.to_string()))
}

async fn spawn_client(binary: &Path, name: &str, host: &str, port: &str) -> Result<ChildProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg(host)
        .arg("-p")
        .arg(port)
        .arg("--name")
        .arg(name)
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn client {name}"))?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ChildProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    loop {
        let line = read_line_expect(&mut process.stdout, "waiting for welcome banner").await?;
        if line.starts_with(&format!("Welcome, {name}!")) {
            break;
        }
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .with_context(|| format!("{name} did not exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
