use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay broker, accepting local TCP connections.
    Broker(BrokerArgs),
    /// Join a channel on a broker and exchange typed chat messages.
    Chat(ChatArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BrokerArgs {
    /// Socket address the broker should bind to. Use 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct ChatArgs {
    /// Name attached to every message you send.
    #[arg(long)]
    pub nickname: String,

    /// Address of the broker to connect to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,

    /// Channel to publish and subscribe on.
    #[arg(long, default_value = "chat")]
    pub channel: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_defaults() {
        let cli = Cli::try_parse_from(["typed-pubsub", "chat", "--nickname", "alice"])
            .expect("parse chat args");
        match cli.command {
            Command::Chat(args) => {
                assert_eq!(args.nickname, "alice");
                assert_eq!(args.channel, "chat");
                assert_eq!(args.server, "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
