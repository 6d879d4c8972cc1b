//! Terminal chat over the relay, built on the typed adapter.
//!
//! Every line typed is published as a [`ChatMsg`] under [`CHAT_TAG`]; every
//! `ChatMsg` received on the channel is printed as `<username> message`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    sync::mpsc,
};
use tracing::warn;

use crate::{
    cli::ChatArgs,
    envelope::Envelope,
    object::StructuredObject,
    publisher::TypedPublisher,
    subscriber::TypedSubscriber,
    transport::{Publish, relay::RelayNode},
};

pub const CHAT_TAG: &str = "ChatMsg";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMsg {
    pub username: String,
    pub message: String,
}

impl ChatMsg {
    fn render(&self) -> String {
        format!("<{}> {}", self.username, self.message)
    }
}

/// Subscriber that forwards every decoded [`ChatMsg`] into `inbox`.
pub fn chat_subscriber(
    channel: &str,
    inbox: mpsc::UnboundedSender<ChatMsg>,
) -> crate::Result<TypedSubscriber> {
    let subscriber = TypedSubscriber::new(
        channel,
        move |object: Box<dyn StructuredObject>, _envelope: &Envelope| {
            if let Some(msg) = object.downcast::<ChatMsg>() {
                let _ = inbox.send(*msg);
            }
        },
    );
    subscriber.register_as::<ChatMsg>(CHAT_TAG)?;
    Ok(subscriber)
}

pub async fn run(args: ChatArgs) -> Result<()> {
    let node = RelayNode::connect(args.server).await?;

    let (inbox_tx, mut inbox) = mpsc::unbounded_channel();
    let subscriber = chat_subscriber(&args.channel, inbox_tx)?;
    node.subscribe(args.channel.clone(), subscriber.receiver())
        .await?;
    let publisher = TypedPublisher::new(node.publisher(args.channel.clone()));

    write_stdout(&format!(
        "*** joined #{} as {}",
        args.channel, args.nickname
    ))
    .await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        select! {
            Some(msg) = inbox.recv() => {
                write_stdout(&msg.render()).await?;
            }
            line = stdin.next_line() => {
                if !handle_stdin_line(line?, &publisher, &args.nickname).await? {
                    break;
                }
            }
            _ = node.closed() => {
                write_stdout("*** server closed the connection").await?;
                break;
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }

    Ok(())
}

async fn handle_stdin_line<P: Publish>(
    line: Option<String>,
    publisher: &TypedPublisher<P>,
    nickname: &str,
) -> Result<bool> {
    let Some(line) = line else {
        return Ok(false);
    };

    let text = line.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    publisher.send_object(
        CHAT_TAG,
        &ChatMsg {
            username: nickname.to_string(),
            message: text.to_string(),
        },
    )?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::transport::local::LocalBus;

    #[tokio::test]
    async fn typed_lines_reach_the_inbox() {
        let bus = LocalBus::new();
        let (inbox_tx, mut inbox) = mpsc::unbounded_channel();
        let subscriber = chat_subscriber("chat", inbox_tx).expect("subscriber");
        bus.subscribe("chat", subscriber.receiver());
        let publisher = TypedPublisher::new(bus.publisher("chat"));

        let keep_going = handle_stdin_line(Some("hello there\n".into()), &publisher, "alice")
            .await
            .expect("handle line");
        assert!(keep_going);

        let msg = inbox.recv().await.expect("chat message");
        assert_eq!(msg.render(), "<alice> hello there");
    }

    #[tokio::test]
    async fn blank_lines_are_not_published() {
        let bus = LocalBus::new();
        let published = Arc::new(parking_lot::Mutex::new(0));
        let counter = Arc::clone(&published);
        bus.subscribe(
            "chat",
            Arc::new(move |_envelope: Envelope| *counter.lock() += 1),
        );
        let publisher = TypedPublisher::new(bus.publisher("chat"));

        let keep_going = handle_stdin_line(Some("   ".into()), &publisher, "bob")
            .await
            .expect("handle line");
        assert!(keep_going);
        let stopped = handle_stdin_line(None, &publisher, "bob")
            .await
            .expect("handle eof");
        assert!(!stopped);
        assert_eq!(*published.lock(), 0);
    }
}
