use thiserror::Error;

use super::{Cleaner, EventSink, Summary};
use crate::config::ProjectSpec;
use crate::gitlab::{FetchError, Listing, Repository, Transport};

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("can't get repositories of project {project} ({id})")]
    Repositories {
        project: String,
        id: u64,
        #[source]
        source: FetchError,
    },
}

/// Result of cleaning one configured project.
#[derive(Debug)]
pub struct ProjectOutcome {
    pub project: String,
    pub result: Result<Summary, CleanupError>,
}

impl<T: Transport, E: EventSink> Cleaner<T, E> {
    /// Cleans every project concurrently and waits for all of them.
    ///
    /// Projects are interleaved on the current task; nothing is spawned. A
    /// failing project never cancels the others, and the outcomes come back
    /// in the order of `projects`.
    pub async fn run(&self, projects: &[ProjectSpec]) -> Vec<ProjectOutcome> {
        let tasks = projects.iter().map(|project| async move {
            ProjectOutcome {
                project: project.name.clone(),
                result: self.process_project(project).await,
            }
        });
        futures::future::join_all(tasks).await
    }

    /// Cleans the repositories of one project, one after another.
    pub async fn process_project(&self, project: &ProjectSpec) -> Result<Summary, CleanupError> {
        log::info!(
            "Start processing project: {} (retention {})",
            project.name,
            project.retention,
        );

        let url = self.endpoints.repositories(project.id);
        let listing: Listing<Repository> = self
            .client
            .fetch_all(&url, &self.options)
            .await
            .map_err(|source| {
                log::error!("Can't get data from project {}: {}", project.name, source);
                CleanupError::Repositories {
                    project: project.name.clone(),
                    id: project.id,
                    source,
                }
            })?;

        let mut summary = Summary {
            missing_pages: listing.missing_pages.len(),
            ..Default::default()
        };
        for repository in &listing.items {
            log::info!("Processing repository {} ({})", repository.path, repository.id);
            summary.repositories += 1;

            match self
                .process_repository(project.id, repository.id, &project.retention)
                .await
            {
                Ok(repository_summary) => summary.merge(&repository_summary),
                Err(error) => {
                    log::error!("Can't get tags of repository {}: {}", repository.path, error);
                    summary.failed_repositories += 1;
                }
            }
        }

        Ok(summary)
    }
}
