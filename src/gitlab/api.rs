use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    pub path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TagSummary {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TagDetail {
    pub name: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub location: String,
}

impl TagDetail {
    /// `location` without its trailing `:<tag>` part.
    pub fn image_path(&self) -> &str {
        match self.location.rsplit_once(':') {
            Some((path, _)) => path,
            None => &self.location,
        }
    }
}

#[derive(Debug, Error)]
#[error("{0} cannot be used as a registry base url")]
pub struct InvalidBaseUrl(String);

/// Container registry endpoints of the GitLab v4 API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base: Url) -> Result<Self, InvalidBaseUrl> {
        if base.cannot_be_a_base() {
            return Err(InvalidBaseUrl(base.to_string()));
        }
        Ok(Self { base })
    }

    pub fn repositories(&self, project_id: u64) -> Url {
        self.join(&[
            "api",
            "v4",
            "projects",
            &project_id.to_string(),
            "registry",
            "repositories",
        ])
    }

    pub fn tags(&self, project_id: u64, repository_id: u64) -> Url {
        let mut url = self.repositories(project_id);
        Self::extend(&mut url, &[&repository_id.to_string(), "tags"]);
        url
    }

    /// Single-tag url, used both to read and to delete. The tag name is
    /// percent-encoded as one path segment.
    pub fn tag(&self, project_id: u64, repository_id: u64, tag_name: &str) -> Url {
        let mut url = self.tags(project_id, repository_id);
        Self::extend(&mut url, &[tag_name]);
        url
    }

    fn join(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        Self::extend(&mut url, segments);
        url
    }

    fn extend(url: &mut Url, segments: &[&str]) {
        // Checked in `new`: the base always has path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
    }
}
