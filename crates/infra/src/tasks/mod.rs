//! Deletion tasks: what each pipeline publishes and how its messages are handled.
//!
//! | task | source | message | handler |
//! |------|--------|---------|---------|
//! | `delete-folders` | `deleted_folders`, one row per item | `DeletedFolder` object | cascade files and child folders, then mark processed |
//! | `delete-files` | `deleted_files`, pages chunked by 10 | `{"payload": [DeletedFile..]}` | gateway delete, then mark confirmed rows processed |

pub mod delete_files;
pub mod delete_folders;

use std::fmt;
use std::str::FromStr;

pub use delete_files::FileDeletionHandler;
pub use delete_folders::FolderDeletionHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    DeleteFolders,
    DeleteFiles,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::DeleteFolders, TaskKind::DeleteFiles];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::DeleteFolders => "delete-folders",
            TaskKind::DeleteFiles => "delete-files",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task type '{0}' (expected delete-folders or delete-files)")]
pub struct UnknownTask(pub String);

impl FromStr for TaskKind {
    type Err = UnknownTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| UnknownTask(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_names_round_trip() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
        assert!("mark-deleted".parse::<TaskKind>().is_err());
    }
}
