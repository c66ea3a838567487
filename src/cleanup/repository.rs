use chrono::Utc;

use super::{is_expired, Cleaner, CleanupEvent, EventSink, Expiry, Operation, Summary, TagOutcome};
use crate::config::Retention;
use crate::gitlab::{FetchError, Listing, TagDetail, TagSummary, Transport};

/// A tag that is about to be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRef<'a> {
    pub project_id: u64,
    pub repository_id: u64,
    pub name: &'a str,
    pub image_path: &'a str,
}

impl<T: Transport, E: EventSink> Cleaner<T, E> {
    /// Walks every tag of one repository, deleting the expired ones.
    ///
    /// Fails only when the tag listing itself is unavailable. Problems with a
    /// single tag are logged and counted, never propagated.
    pub async fn process_repository(
        &self,
        project_id: u64,
        repository_id: u64,
        retention: &Retention,
    ) -> Result<Summary, FetchError> {
        let url = self.endpoints.tags(project_id, repository_id);
        let listing: Listing<TagSummary> = self.client.fetch_all(&url, &self.options).await?;

        let mut summary = Summary {
            missing_pages: listing.missing_pages.len(),
            ..Default::default()
        };
        if !listing.is_complete() {
            log::warn!(
                "Tag listing of repository {} is missing page(s) {:?}",
                repository_id,
                listing.missing_pages,
            );
        }

        for tag in &listing.items {
            let outcome = self
                .process_tag(project_id, repository_id, &tag.name, retention)
                .await;
            log::debug!("Tag {} of repository {}: {:?}", tag.name, repository_id, outcome);
            summary.record(outcome);
        }

        Ok(summary)
    }

    pub async fn process_tag(
        &self,
        project_id: u64,
        repository_id: u64,
        tag_name: &str,
        retention: &Retention,
    ) -> TagOutcome {
        let url = self.endpoints.tag(project_id, repository_id, tag_name);
        let detail = match self.client.get(&url, &self.options).await {
            Ok(response) => response
                .ensure_ok(&url)
                .and_then(|response| response.json::<TagDetail>(&url)),
            Err(error) => Err(error),
        };
        let detail = match detail {
            Ok(detail) => detail,
            Err(error) => {
                log::error!("Skipping tag {}: {}", tag_name, error);
                return TagOutcome::Skipped;
            }
        };

        let expiry = is_expired(detail.created_at.as_deref(), retention, Utc::now());
        if expiry == Expiry::Unknown {
            log::warn!(
                "Can't read created_at field of tag {}: {:?}",
                tag_name,
                detail.created_at,
            );
        }

        self.events.record(&CleanupEvent::new(
            Operation::Processing,
            &detail.name,
            detail.image_path(),
        ));

        match expiry {
            Expiry::Expired => {
                let tag = TagRef {
                    project_id,
                    repository_id,
                    name: tag_name,
                    image_path: detail.image_path(),
                };
                self.delete_or_simulate(&tag).await
            }
            Expiry::Retained => TagOutcome::Retained,
            Expiry::Unknown => TagOutcome::Unknown,
        }
    }

    /// Deletes `tag`, or only reports it when running dry.
    ///
    /// The `deleted` event goes out before the request is sent and regardless
    /// of its result; a failed delete shows up as an error log line and as
    /// [`TagOutcome::DeleteFailed`], not as a separate event.
    pub async fn delete_or_simulate(&self, tag: &TagRef<'_>) -> TagOutcome {
        if self.dry_run {
            self.events.record(&CleanupEvent::new(
                Operation::DryRun,
                tag.name,
                tag.image_path,
            ));
            return TagOutcome::DryRunLogged;
        }

        self.events.record(&CleanupEvent::new(
            Operation::Deleted,
            tag.name,
            tag.image_path,
        ));

        let url = self
            .endpoints
            .tag(tag.project_id, tag.repository_id, tag.name);
        match self.client.delete(&url, &self.options).await {
            Ok(response) if response.is_success() => TagOutcome::Deleted,
            Ok(response) => {
                log::error!(
                    "Failed to delete tag {} with status {}: {}",
                    tag.name,
                    response.status,
                    response.body,
                );
                TagOutcome::DeleteFailed
            }
            Err(error) => {
                log::error!("Failed to delete tag {}: {}", tag.name, error);
                TagOutcome::DeleteFailed
            }
        }
    }
}
