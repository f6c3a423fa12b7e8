//! CLI argument parsing for queuestore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "qs")]
#[command(author, version, about = "Directory-partitioned task queue", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new task to the queue
    Add {
        /// Short task name
        #[arg(required = true)]
        name: String,

        /// Full task description
        #[arg(required = true)]
        description: String,

        /// Priority; lower runs first
        #[arg(short, long, default_value = "5")]
        priority: u32,

        /// Free-form category
        #[arg(long)]
        category: Option<String>,
    },

    /// List tasks, optionally by status
    List {
        /// Restrict to one status (todo, analysed, in-progress, ...)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show one task record in full
    Show {
        /// Task id (full id; prefixes are not supported)
        #[arg(required = true)]
        id: String,
    },

    /// Answer an analysis question on a task
    Answer {
        /// Task id
        #[arg(required = true)]
        id: String,

        /// The question as it was asked
        #[arg(required = true)]
        question: String,

        /// The operator's answer
        #[arg(required = true)]
        answer: String,
    },

    /// Approve splitting a task into its proposed subtasks
    Split {
        /// Task id
        #[arg(required = true)]
        id: String,
    },

    /// Cancel a task
    Cancel {
        /// Task id
        #[arg(required = true)]
        id: String,
    },
}
