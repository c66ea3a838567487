use std::fmt::Display;

use crate::gitlab::{Endpoints, RequestClient, RequestOptions, Transport};

mod events;
mod expiry;
mod project;
mod repository;

pub use events::*;
pub use expiry::*;
pub use project::*;

/// Walks projects, their repositories and tags, deleting expired tags.
///
/// Work is strictly nested and sequential inside a project: one repository
/// at a time, one tag at a time, one page at a time. Only projects run
/// concurrently (see [`Cleaner::run`]).
pub struct Cleaner<T, E> {
    client: RequestClient<T>,
    endpoints: Endpoints,
    options: RequestOptions,
    events: E,
    dry_run: bool,
}

impl<T: Transport, E: EventSink> Cleaner<T, E> {
    pub fn new(
        client: RequestClient<T>,
        endpoints: Endpoints,
        options: RequestOptions,
        events: E,
    ) -> Self {
        Self {
            client,
            endpoints,
            options,
            events,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// What happened to one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOutcome {
    Deleted,
    DeleteFailed,
    DryRunLogged,
    Retained,
    /// Creation time unreadable, kept.
    Unknown,
    /// Detail could not be fetched.
    Skipped,
}

/// Counters for a repository or a whole project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub repositories: usize,
    pub failed_repositories: usize,
    pub tags: usize,
    pub deleted: usize,
    pub delete_failed: usize,
    pub dry_run: usize,
    pub retained: usize,
    pub unknown: usize,
    pub skipped: usize,
    pub missing_pages: usize,
}

impl Summary {
    pub fn record(&mut self, outcome: TagOutcome) {
        self.tags += 1;
        match outcome {
            TagOutcome::Deleted => self.deleted += 1,
            TagOutcome::DeleteFailed => self.delete_failed += 1,
            TagOutcome::DryRunLogged => self.dry_run += 1,
            TagOutcome::Retained => self.retained += 1,
            TagOutcome::Unknown => self.unknown += 1,
            TagOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: &Summary) {
        self.repositories += other.repositories;
        self.failed_repositories += other.failed_repositories;
        self.tags += other.tags;
        self.deleted += other.deleted;
        self.delete_failed += other.delete_failed;
        self.dry_run += other.dry_run;
        self.retained += other.retained;
        self.unknown += other.unknown;
        self.skipped += other.skipped;
        self.missing_pages += other.missing_pages;
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} repositories ({} failed), {} tags: {} deleted, {} failed to delete, \
             {} dry run, {} retained, {} unknown, {} skipped",
            self.repositories,
            self.failed_repositories,
            self.tags,
            self.deleted,
            self.delete_failed,
            self.dry_run,
            self.retained,
            self.unknown,
            self.skipped,
        )?;
        if self.missing_pages > 0 {
            write!(f, ", {} listing page(s) lost", self.missing_pages)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{cell::RefCell, sync::Once, time::Duration};

    use url::Url;

    use super::*;
    use crate::gitlab::{ApiResponse, MockTransport, RetryPolicy};

    pub const BASE: &str = "https://gitlab.example.com";

    pub fn cleaner<E: EventSink>(
        transport: MockTransport,
        events: E,
        dry_run: bool,
    ) -> Cleaner<MockTransport, E> {
        let options = RequestOptions::default()
            .with_max_retries(2)
            .with_header("PRIVATE-TOKEN", "secret");
        cleaner_with_options(transport, events, dry_run, options)
    }

    pub fn cleaner_with_options<E: EventSink>(
        transport: MockTransport,
        events: E,
        dry_run: bool,
        options: RequestOptions,
    ) -> Cleaner<MockTransport, E> {
        let client =
            RequestClient::new(transport).with_retry_policy(RetryPolicy::fixed(Duration::ZERO));
        let endpoints = Endpoints::new(Url::parse(BASE).unwrap()).unwrap();
        Cleaner::new(client, endpoints, options, events).dry_run(dry_run)
    }

    thread_local! {
        static RECORDS: RefCell<Vec<(log::Level, String)>> = RefCell::new(Vec::new());
    }

    /// Keeps log records per thread, so parallel tests don't see each other's.
    struct CaptureLogger;

    impl log::Log for CaptureLogger {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            RECORDS.with(|records| {
                records
                    .borrow_mut()
                    .push((record.level(), record.args().to_string()))
            });
        }

        fn flush(&self) {}
    }

    static LOGGER: CaptureLogger = CaptureLogger;
    static INIT: Once = Once::new();

    /// Starts collecting the current thread's log records, dropping older ones.
    pub fn capture_logs() {
        INIT.call_once(|| {
            if log::set_logger(&LOGGER).is_ok() {
                log::set_max_level(log::LevelFilter::Trace);
            }
        });
        RECORDS.with(|records| records.borrow_mut().clear());
    }

    pub fn captured(level: log::Level) -> Vec<String> {
        RECORDS.with(|records| {
            records
                .borrow()
                .iter()
                .filter(|(record_level, _)| *record_level == level)
                .map(|(_, message)| message.clone())
                .collect()
        })
    }

    pub fn page(body: &str, page: u32, total: u32) -> ApiResponse {
        ApiResponse::new(200, body)
            .with_header("X-Page", page)
            .with_header("X-Total-Pages", total)
    }

    pub fn tag_detail(name: &str, created_at: &str) -> ApiResponse {
        ApiResponse::new(
            200,
            serde_json::json!({
                "name": name,
                "path": format!("group/app:{}", name),
                "location": format!("registry.example.com/group/app:{}", name),
                "created_at": created_at,
            })
            .to_string(),
        )
    }

    pub fn silent_events() -> MockEventSink {
        let mut events = MockEventSink::new();
        events.expect_record().return_const(());
        events
    }
}
