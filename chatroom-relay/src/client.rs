use std::{
    io::{self as std_io, BufRead},
    thread,
};

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::{
    cli::ClientArgs,
    protocol::{QUIT_KEYWORD, READ_BUFFER_SIZE},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let mut input = spawn_stdin_reader();
    let stream = establish_connection(&args).await?;

    let name = match args.name {
        Some(name) => name,
        None => prompt_name(&mut input).await?,
    };

    let (mut reader, mut writer) = stream.into_split();
    send_handshake(&mut writer, &name).await?;
    write_stdout(&format!(
        "Welcome, {name}! Leave the chatroom anytime by typing '{QUIT_KEYWORD}'"
    ))
    .await?;

    run_client_loop(&mut reader, &mut writer, &mut input, &name).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<TcpStream> {
    write_stdout(&format!("Trying to connect to {}:{}...", args.host, args.port)).await?;
    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;
    write_stdout(&format!(
        "Successfully connected to {}:{}",
        args.host, args.port
    ))
    .await?;
    Ok(stream)
}

async fn prompt_name(input: &mut mpsc::Receiver<String>) -> Result<String> {
    loop {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(b"Your name: ").await?;
        stdout.flush().await?;

        let line = input.recv().await.context("stdin closed before a name was given")?;
        let name = line.trim();
        if !name.is_empty() {
            return Ok(name.to_string());
        }
    }
}

async fn send_handshake(writer: &mut OwnedWriteHalf, name: &str) -> Result<()> {
    writer
        .write_all(format!("{name}\n").as_bytes())
        .await
        .context("failed to send name")?;
    Ok(())
}

async fn run_client_loop(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    input: &mut mpsc::Receiver<String>,
    name: &str,
) -> Result<()> {
    let mut buffer = vec![0; READ_BUFFER_SIZE];
    loop {
        select! {
            read = reader.read(&mut buffer) => {
                if !handle_server_chunk(read, &buffer).await? {
                    break;
                }
            }
            line = input.recv() => {
                let Some(line) = line else {
                    break;
                };
                if !handle_stdin_line(&line, name, writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_chunk(read: io::Result<usize>, buffer: &[u8]) -> Result<bool> {
    match read {
        Ok(0) => {
            write_stdout("We have lost connection to the server!").await?;
            Ok(false)
        }
        Ok(len) => {
            write_stdout(&String::from_utf8_lossy(&buffer[..len])).await?;
            Ok(true)
        }
        Err(error) => {
            debug!(?error, "read from server failed");
            write_stdout("We have lost connection to the server!").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_line(line: &str, name: &str, writer: &mut OwnedWriteHalf) -> Result<bool> {
    let text = line.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return Ok(true);
    }

    if text == QUIT_KEYWORD {
        writer.write_all(QUIT_KEYWORD.as_bytes()).await?;
        write_stdout("Quitting...").await?;
        return Ok(false);
    }

    writer.write_all(format!("{name}: {text}").as_bytes()).await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

// Lines are read on a plain thread: tokio's stdin can't cancel a pending
// read, which would keep the process alive after the server hangs up.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (line_tx, line_rx) = mpsc::channel(16);
    thread::spawn(move || {
        for line in std_io::stdin().lock().lines() {
            let Ok(line) = line else {
                return;
            };
            if line_tx.blocking_send(line).is_err() {
                return;
            }
        }
    });
    line_rx
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
