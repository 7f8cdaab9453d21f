use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "litmesh")]
#[command(author, version, about = "Agent mesh for distributed literature search", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a node: directory, search coordinator, catalog sources and the gated server
    Serve {
        /// Address to listen on (overrides transport.bind_addr)
        #[arg(short, long)]
        bind: Option<String>,

        /// Catalog source as NAME=PATH, PATH being a JSON array of documents
        #[arg(short = 's', long = "source", value_parser = parse_source)]
        sources: Vec<(String, PathBuf)>,
    },

    /// Send a query through a node's gated server and print the merged result
    Query {
        text: String,

        #[arg(short, long, default_value = "127.0.0.1:7070")]
        addr: String,

        /// Source to search (repeatable)
        #[arg(short = 's', long = "source", required = true)]
        sources: Vec<String>,

        /// Deadline in milliseconds
        #[arg(short, long)]
        deadline: Option<u64>,

        /// Allow Ctrl-C to return what has arrived so far instead of cancelling
        #[arg(short, long)]
        partial: bool,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show an agent's status and live request handlers
    Status {
        #[arg(default_value = "search")]
        agent: String,

        #[arg(short, long, default_value = "127.0.0.1:7070")]
        addr: String,
    },

    /// Ask the directory to kill an agent
    Kill {
        agent: String,

        #[arg(short, long, default_value = "127.0.0.1:7070")]
        addr: String,

        /// Directory secret (defaults to LITMESH_DIRECTORY_SECRET)
        #[arg(long)]
        admin_secret: Option<String>,
    },
}

fn parse_source(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got '{}'", value)),
    }
}
