use clap::{Args, Parser, Subcommand};

use crate::protocol::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about = "Chatroom relay server and terminal client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server. Type `q` on its stdin to shut it down.
    Server(ServerArgs),
    /// Connect to a relay server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Interface the server listens at.
    pub host: String,

    /// TCP port. Use 0 for an ephemeral port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Host the relay server runs on.
    pub host: String,

    /// TCP port of the relay server.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Name shown to other participants. Prompted for when omitted.
    #[arg(long)]
    pub name: Option<String>,
}
