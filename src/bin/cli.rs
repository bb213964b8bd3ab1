//! CLI for talking to a meshkv node

use clap::{Parser, Subcommand};
use meshkv::KvClient;

#[derive(Parser)]
#[command(name = "meshkv")]
#[command(about = "meshkv key-value store CLI")]
#[command(version)]
struct Cli {
    /// Node client endpoint
    #[arg(long, default_value = "127.0.0.1:9000")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set a key
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },

    /// Get a key
    Get {
        /// Key
        key: String,
    },

    /// Send a raw command line and print the response
    Raw {
        /// Command text, e.g. "get a"
        line: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut client = KvClient::connect(cli.addr.as_str()).await?;

    match cli.command {
        Commands::Set { key, value } => {
            client.set(&key, &value).await?;
            println!("OK");
        }

        Commands::Get { key } => match client.get(&key).await? {
            Some(value) => println!("{}", value),
            None => {
                eprintln!("(absent)");
                std::process::exit(1);
            }
        },

        Commands::Raw { line } => {
            let response = client.send_raw(&line).await?;
            println!("{:?}", response);
        }
    }

    Ok(())
}
