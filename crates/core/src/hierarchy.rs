//! Status values carried by rows of the file hierarchy.
//!
//! The sweeper never holds hierarchy state; it only triggers bounded bulk
//! mutations through the store. Folders carry a plain `removed` flag.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Value of the `files.status` column.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Exists,
    Trashed,
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Exists => "EXISTS",
            FileStatus::Trashed => "TRASHED",
            FileStatus::Deleted => "DELETED",
        }
    }
}

impl core::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXISTS" => Ok(FileStatus::Exists),
            "TRASHED" => Ok(FileStatus::Trashed),
            "DELETED" => Ok(FileStatus::Deleted),
            other => Err(DomainError::validation(format!("unknown file status: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_column_text() {
        for status in [FileStatus::Exists, FileStatus::Trashed, FileStatus::Deleted] {
            assert_eq!(status.as_str().parse::<FileStatus>().unwrap(), status);
        }
        assert!("GONE".parse::<FileStatus>().is_err());
    }
}
