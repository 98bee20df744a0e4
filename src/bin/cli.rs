//! aofkv CLI Client
//!
//! Sends one command to a running server and prints the reply.

use std::io::Write;
use std::net::TcpStream;
use std::process::ExitCode;

use aofkv::protocol::{encode_command, Droplet, Parser as RespParser, Reply};
use clap::{Parser, Subcommand};

/// aofkv CLI
#[derive(Parser, Debug)]
#[command(name = "aofkv-cli")]
#[command(about = "CLI for the aofkv key-value server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Ping the server
    Ping,

    /// Send an arbitrary command, e.g. `exec rpush mylist a b`
    Exec {
        #[arg(required = true, num_args = 1..)]
        args: Vec<String>,
    },
}

impl Commands {
    fn into_args(self) -> Vec<String> {
        match self {
            Commands::Get { key } => vec!["GET".into(), key],
            Commands::Set { key, value } => vec!["SET".into(), key, value],
            Commands::Del { key } => vec!["DEL".into(), key],
            Commands::Ping => vec!["PING".into()],
            Commands::Exec { args } => args,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let request = encode_command(&args.command.into_args());

    let mut stream = match TcpStream::connect(&args.server) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Could not connect to {}: {}", args.server, e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = stream.write_all(&request) {
        eprintln!("Failed to send command: {}", e);
        return ExitCode::FAILURE;
    }

    match RespParser::new().parse_stream(&stream).next() {
        Some(Droplet::Reply(reply)) => {
            print_reply(&reply);
            if reply.is_error() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Some(Droplet::Error { err, .. }) | Some(Droplet::Terminated(Some(err))) => {
            eprintln!("Bad reply from server: {}", err);
            ExitCode::FAILURE
        }
        Some(Droplet::Terminated(None)) | None => {
            eprintln!("Server closed the connection");
            ExitCode::FAILURE
        }
    }
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::Status(s) => println!("{s}"),
        Reply::Error(e) => println!("(error) {e}"),
        Reply::Integer(n) => println!("(integer) {n}"),
        Reply::Bulk(b) => println!("\"{}\"", String::from_utf8_lossy(b)),
        Reply::Null => println!("(nil)"),
        Reply::MultiBulk(items) if items.is_empty() => println!("(empty array)"),
        Reply::MultiBulk(items) => {
            for (i, item) in items.iter().enumerate() {
                println!("{}) \"{}\"", i + 1, String::from_utf8_lossy(item));
            }
        }
        Reply::Array(items) if items.is_empty() => println!("(empty array)"),
        Reply::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                print!("{}) ", i + 1);
                print_reply(item);
            }
        }
    }
}
