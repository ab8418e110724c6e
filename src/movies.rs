use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::model::MovieId;

pub const DEFAULT_TMDB_URL: &str = "https://api.themoviedb.org/3";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MovieRecord {
    pub id: MovieId,
    pub title: String,
}

#[derive(Debug)]
pub enum LookupError {
    NotFound(MovieId),
    Transport(String),
    Decode(String),
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupError::NotFound(id) => write!(f, "movie {id} not found"),
            LookupError::Transport(e) => write!(f, "movie lookup transport error: {e}"),
            LookupError::Decode(e) => write!(f, "movie lookup returned malformed body: {e}"),
        }
    }
}

impl std::error::Error for LookupError {}

/// Verifies that a movie exists in the catalog.
#[async_trait]
pub trait MovieLookup: Send + Sync {
    async fn get_movie(&self, id: MovieId) -> Result<MovieRecord, LookupError>;
}

/// TMDB v3 `GET /movie/{id}` with a bearer token.
pub struct TmdbClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl TmdbClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl MovieLookup for TmdbClient {
    async fn get_movie(&self, id: MovieId) -> Result<MovieRecord, LookupError> {
        let url = format!("{}/movie/{id}?language=en-US", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| LookupError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(LookupError::NotFound(id)),
            status if !status.is_success() => {
                tracing::debug!("movie lookup {id} answered {status}");
                return Err(LookupError::Transport(format!("unexpected status {status}")));
            }
            _ => {}
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| LookupError::Transport(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| LookupError::Decode(e.to_string()))
    }
}

/// Fixed id → title catalog, for offline deployments and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    movies: HashMap<MovieId, String>,
}

impl StaticCatalog {
    pub fn new<I, S>(movies: I) -> Self
    where
        I: IntoIterator<Item = (MovieId, S)>,
        S: Into<String>,
    {
        Self {
            movies: movies.into_iter().map(|(id, t)| (id, t.into())).collect(),
        }
    }

    /// Catalog of bare ids; titles are placeholders.
    pub fn from_ids(ids: &[MovieId]) -> Self {
        Self::new(ids.iter().map(|&id| (id, format!("movie {id}"))))
    }

    pub fn len(&self) -> usize {
        self.movies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }
}

#[async_trait]
impl MovieLookup for StaticCatalog {
    async fn get_movie(&self, id: MovieId) -> Result<MovieRecord, LookupError> {
        self.movies
            .get(&id)
            .map(|title| MovieRecord {
                id,
                title: title.clone(),
            })
            .ok_or(LookupError::NotFound(id))
    }
}
