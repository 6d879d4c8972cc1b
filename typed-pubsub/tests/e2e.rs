use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const LINE_TIMEOUT: Duration = Duration::from_secs(3);
const CHANNEL: &str = "e2e";

type Output = Lines<BufReader<ChildStdout>>;

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("typed-pubsub");

    let (mut broker, mut broker_log) = start_broker(&binary).await?;
    let addr = listening_addr(&mut broker_log).await?;

    let mut alice = Participant::join(&binary, &addr, "alice").await?;
    let mut bob = Participant::join(&binary, &addr, "bob").await?;

    // Subscribers on the channel include the sender.
    alice.say("Hello from Alice").await?;
    bob.expect("<alice> Hello from Alice").await?;
    alice.expect("<alice> Hello from Alice").await?;

    bob.say("Hi Alice!").await?;
    alice.expect("<bob> Hi Alice!").await?;
    bob.expect("<bob> Hi Alice!").await?;

    alice.say("/quit").await?;
    alice.expect("*** leaving chat").await?;
    alice.exits_cleanly().await?;

    // Bob is still connected; losing the broker must end his session too.
    broker.kill().await.context("kill broker")?;
    let _ = broker.wait().await;
    bob.expect("*** server closed the connection").await?;
    bob.exits_cleanly().await?;

    Ok(())
}

struct Participant {
    nickname: String,
    child: Child,
    stdin: ChildStdin,
    output: Output,
}

impl Participant {
    async fn join(binary: &Path, addr: &str, nickname: &str) -> Result<Self> {
        let mut child = Command::new(binary)
            .args(["chat", "--nickname", nickname, "--server", addr])
            .args(["--channel", CHANNEL])
            .env("RUST_LOG", "warn")
            .env("NO_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn chat client {nickname}"))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            bail!("chat client {nickname} has no piped stdio");
        };

        let mut participant = Self {
            nickname: nickname.to_string(),
            child,
            stdin,
            output: BufReader::new(stdout).lines(),
        };
        // Printed only after the broker acknowledged the subscription.
        participant
            .expect(&format!("*** joined #{CHANNEL} as {nickname}"))
            .await?;
        Ok(participant)
    }

    async fn say(&mut self, text: &str) -> Result<()> {
        self.stdin
            .write_all(format!("{text}\n").as_bytes())
            .await
            .with_context(|| format!("{} failed to type {text:?}", self.nickname))?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn expect(&mut self, wanted: &str) -> Result<()> {
        let line = next_line(&mut self.output)
            .await
            .with_context(|| format!("{} waiting for {wanted:?}", self.nickname))?;
        if line != wanted {
            bail!("{} printed {line:?}, expected {wanted:?}", self.nickname);
        }
        Ok(())
    }

    async fn exits_cleanly(mut self) -> Result<()> {
        let status = timeout(LINE_TIMEOUT, self.child.wait())
            .await
            .with_context(|| format!("{} did not exit", self.nickname))??;
        if !status.success() {
            bail!("{} exited with {status}", self.nickname);
        }
        Ok(())
    }
}

async fn start_broker(binary: &Path) -> Result<(Child, Output)> {
    let mut child = Command::new(binary)
        .args(["broker", "--listen", "127.0.0.1:0"])
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("spawn broker")?;
    let stdout = child.stdout.take().context("broker stdout is not piped")?;
    Ok((child, BufReader::new(stdout).lines()))
}

/// Reads the broker log until the listening banner and returns its address.
async fn listening_addr(log: &mut Output) -> Result<String> {
    loop {
        let line = next_line(log).await.context("waiting for broker banner")?;
        if let Some((_, addr)) = line.split_once("broker listening on ") {
            return Ok(addr.trim().to_string());
        }
    }
}

async fn next_line(output: &mut Output) -> Result<String> {
    match timeout(LINE_TIMEOUT, output.next_line()).await {
        Ok(Ok(Some(line))) => Ok(line),
        Ok(Ok(None)) => bail!("stdout closed"),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => bail!("no output within {LINE_TIMEOUT:?}"),
    }
}
