use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Processing,
    Deleted,
    DryRun,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Deleted => "deleted",
            Self::DryRun => "dry_run",
        }
    }
}

/// Something that happened to a single tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupEvent {
    pub operation: Operation,
    pub tag_name: String,
    pub tag_location: String,
}

impl CleanupEvent {
    pub fn new(operation: Operation, tag_name: &str, tag_location: &str) -> Self {
        Self {
            operation,
            tag_name: tag_name.to_string(),
            tag_location: tag_location.to_string(),
        }
    }

    pub fn level(&self) -> log::Level {
        match self.operation {
            Operation::DryRun => log::Level::Warn,
            _ => log::Level::Info,
        }
    }

    pub fn message(&self) -> &'static str {
        match self.operation {
            Operation::Processing => "Processing repository tag",
            Operation::Deleted => "Delete tag",
            Operation::DryRun => "Dry run mode enabled. Tag not deleted",
        }
    }
}

impl Display for CleanupEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} operation={} tag_name={} tag_location={}",
            self.message(),
            self.operation.as_str(),
            self.tag_name,
            self.tag_location,
        )
    }
}

/// Receives the per-tag events of a cleanup run.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink {
    fn record(&self, event: &CleanupEvent);
}

/// Writes events to the `log` facade.
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: &CleanupEvent) {
        log::log!(event.level(), "{}", event);
    }
}
