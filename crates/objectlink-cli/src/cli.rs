//! Clap CLI definitions for objectlink.

use clap::{Parser, Subcommand};
use objectlink_types::WireFormat;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
Examples:
  objectlink serve                              Host demo.Counter on 127.0.0.1:8282
  objectlink get demo.Counter                   Print the current property snapshot
  objectlink invoke demo.Counter/increment 5    Call a method with one argument
  objectlink invoke demo.Counter/reset          Call a method without arguments
  objectlink set demo.Counter/count 10          Change a property
  objectlink watch demo.Counter                 Stream changes and signals (Ctrl+C to stop)";

/// Link to remote objects over the ObjectLink protocol.
#[derive(Parser, Debug)]
#[command(name = "objectlink", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file (default: ~/.objectlink/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Hub address to listen on or connect to.
    #[arg(long, global = true)]
    pub addr: Option<SocketAddr>,

    /// Wire format: json or msgpack.
    #[arg(long, global = true, value_parser = parse_format)]
    pub format: Option<WireFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a hub serving the demo.Counter object.
    Serve,
    /// Link an object and print its property snapshot as JSON.
    Get {
        /// Object id, e.g. demo.Counter.
        object_id: String,
    },
    /// Invoke a remote method and print its result.
    Invoke {
        /// Method symbol, e.g. demo.Counter/increment.
        symbol_id: String,
        /// Arguments as JSON; a non-array value is passed as the only argument.
        args: Option<String>,
    },
    /// Set a remote property and wait for the acknowledgement.
    Set {
        /// Property symbol, e.g. demo.Counter/count.
        symbol_id: String,
        /// New value as JSON.
        value: String,
    },
    /// Link an object and print every change and signal until Ctrl+C.
    Watch {
        /// Object id, e.g. demo.Counter.
        object_id: String,
    },
}

fn parse_format(s: &str) -> Result<WireFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "json" => Ok(WireFormat::Json),
        "msgpack" | "messagepack" => Ok(WireFormat::MsgPack),
        other => Err(format!("unknown wire format '{other}' (expected json or msgpack)")),
    }
}
