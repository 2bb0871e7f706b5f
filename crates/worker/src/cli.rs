//! Command-line surface of the worker binary.

use std::fmt;

use clap::{Parser, ValueEnum};

use sweeper_infra::TaskKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Parser)]
#[command(name = "sweeper-worker")]
#[command(about = "Drain the deletion backlog into a work queue, or consume that queue.")]
pub struct Cli {
    /// Which side of the pipeline this process runs.
    #[arg(value_enum)]
    pub role: Role,

    /// Deletion task to run.
    #[arg(long, env = "TASK_TYPE", default_value = "delete-folders")]
    pub task: TaskKind,

    /// Stop the producer once the backlog is empty instead of polling for more.
    #[arg(long, env = "SWEEPER_DRAIN")]
    pub drain: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_role_and_task() {
        let cli = Cli::try_parse_from(["sweeper-worker", "consumer", "--task", "delete-files"]).unwrap();
        assert_eq!(cli.role, Role::Consumer);
        assert_eq!(cli.task, TaskKind::DeleteFiles);
        assert!(!cli.drain);
    }

    #[test]
    fn drain_flag_switches_mode() {
        let cli = Cli::try_parse_from(["sweeper-worker", "producer", "--drain", "--task", "delete-folders"]).unwrap();
        assert!(cli.drain);
    }

    #[test]
    fn unknown_task_is_rejected() {
        assert!(Cli::try_parse_from(["sweeper-worker", "producer", "--task", "shred"]).is_err());
    }

    #[test]
    fn role_is_required() {
        assert!(Cli::try_parse_from(["sweeper-worker"]).is_err());
    }
}
