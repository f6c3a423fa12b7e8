//! CLI argument parsing for overseer

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::registry::LoopKind;

/// Which loops a command addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Analysis,
    Execution,
    Both,
}

impl Mode {
    pub fn kinds(self) -> Vec<LoopKind> {
        match self {
            Self::Analysis => vec![LoopKind::Analysis],
            Self::Execution => vec![LoopKind::Execution],
            Self::Both => LoopKind::all().to_vec(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ov")]
#[command(author, version, about = "Filesystem-coordinated agent loop orchestrator", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbose (debug) logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start worker loops
    Start {
        /// Which loops to start
        #[arg(long, value_enum, default_value = "execution")]
        mode: Mode,

        /// Run in this process instead of spawning daemons
        #[arg(long)]
        foreground: bool,

        /// Exit when the queue drains instead of idling
        #[arg(long)]
        drain: bool,
    },

    /// Request a cooperative stop
    Stop {
        /// Which loops to stop
        #[arg(long, value_enum, default_value = "both")]
        mode: Mode,
    },

    /// Pause all loops at their next suspension point
    Pause,

    /// Clear pause and scoped stop signals
    Resume {
        #[arg(long, value_enum, default_value = "both")]
        mode: Mode,
    },

    /// Recovery escape hatch: clear every signal, force all processes
    /// stopped, clear session locks
    Reset,

    /// Show queue, signal, and session state
    Status,

    /// List registered processes
    Ps,

    /// Hard-kill processes (SIGTERM)
    Kill {
        /// Process id, a kind (analysis, execution, one-shot), or "all"
        #[arg(required = true)]
        target: String,
    },

    /// Send a mid-run instruction to running workers
    Whisper {
        /// Process id, a kind, or "all"
        #[arg(required = true)]
        target: String,

        /// The instruction
        #[arg(required = true)]
        message: String,

        /// Priority label the worker sees (normal, high, ...)
        #[arg(short, long, default_value = "normal")]
        priority: String,
    },

    /// Tail a process's activity log
    Logs {
        /// Process id
        #[arg(required = true)]
        id: String,

        /// Byte offset to resume from (0 with --lines tails the end)
        #[arg(long, default_value = "0")]
        offset: u64,

        /// Initial number of lines from the end
        #[arg(short = 'n', long, default_value = "20")]
        lines: usize,
    },

    /// List tasks in the queue, optionally by status
    Tasks {
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show the project checkout's git state
    GitStatus,

    /// Stage, commit, and push local changes in the project checkout
    Push {
        /// Commit message
        #[arg(short, long, default_value = "overseer: checkpoint")]
        message: String,
    },
}
