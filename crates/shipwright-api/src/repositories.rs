//! Repository directory lookups

use crate::{
    client::HttpClient,
    error::{Error, Result},
    types::Repository,
};

impl HttpClient {
    /// List every repository the release bot knows about
    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let url = self.endpoints().url(&self.endpoints().repositories_path)?;
        let repositories: Option<Vec<Repository>> = self.get_json(url).await?;
        Ok(repositories.unwrap_or_default())
    }
}

/// Find a repository by id, name, or URL (case-insensitive).
///
/// URLs match with or without a trailing `.git` or `/`.
pub fn find_repository<'a>(directory: &'a [Repository], query: &str) -> Option<&'a Repository> {
    let query = normalize(query);
    if query.is_empty() {
        return None;
    }
    directory.iter().find(|r| normalize(&r.id) == query).or_else(|| {
        directory
            .iter()
            .find(|r| normalize(&r.name) == query || normalize(&r.url) == query)
    })
}

/// Resolve human-readable repository references to directory ids.
///
/// Order is preserved and duplicates are dropped.
pub fn resolve_repositories(directory: &[Repository], queries: &[String]) -> Result<Vec<String>> {
    let mut ids: Vec<String> = Vec::with_capacity(queries.len());
    for query in queries {
        let repo = find_repository(directory, query)
            .ok_or_else(|| Error::UnknownRepository(query.clone()))?;
        if !ids.contains(&repo.id) {
            ids.push(repo.id.clone());
        }
    }
    Ok(ids)
}

fn normalize(s: &str) -> String {
    let s = s.trim().trim_end_matches('/');
    let s = s.strip_suffix(".git").unwrap_or(s);
    s.to_lowercase()
}
