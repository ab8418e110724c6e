use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;

use crate::engine::{BookingPolicy, CancellationPolicy, SlotAlignment};
use crate::model::MovieId;
use crate::movies::{DEFAULT_TMDB_URL, MovieLookup, StaticCatalog, TmdbClient};

pub const WAL_FILE_NAME: &str = "reservations.wal";

#[derive(Debug)]
pub enum ConfigError {
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    MissingMovieSource,
    ConflictingMovieSources,
    TlsPair,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "invalid {var}={value:?}: {reason}")
            }
            ConfigError::MissingMovieSource => {
                write!(f, "set MATINEE_TMDB_TOKEN or MATINEE_MOVIE_CATALOG")
            }
            ConfigError::ConflictingMovieSources => {
                write!(f, "MATINEE_TMDB_TOKEN and MATINEE_MOVIE_CATALOG are mutually exclusive")
            }
            ConfigError::TlsPair => {
                write!(f, "both MATINEE_TLS_CERT and MATINEE_TLS_KEY must be set, or neither")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where movie ids are verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovieSource {
    Tmdb { base_url: String, token: String },
    Static(Vec<MovieId>),
}

impl MovieSource {
    pub fn build(&self) -> Arc<dyn MovieLookup> {
        match self {
            MovieSource::Tmdb { base_url, token } => {
                Arc::new(TmdbClient::new(base_url.clone(), token.clone()))
            }
            MovieSource::Static(ids) => Arc::new(StaticCatalog::from_ids(ids)),
        }
    }

    /// Log-safe description; never includes the token.
    pub fn describe(&self) -> String {
        match self {
            MovieSource::Tmdb { base_url, .. } => format!("tmdb ({base_url})"),
            MovieSource::Static(ids) => format!("static catalog ({} movies)", ids.len()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls: Option<(String, String)>,
    pub movies: MovieSource,
    pub policy: BookingPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. `get` returns `None` for unset.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { get: &get };

        let tls = match (env.get("MATINEE_TLS_CERT"), env.get("MATINEE_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => return Err(ConfigError::TlsPair),
        };

        let movies = match (env.get("MATINEE_TMDB_TOKEN"), env.get("MATINEE_MOVIE_CATALOG")) {
            (Some(token), None) => MovieSource::Tmdb {
                base_url: env
                    .get("MATINEE_TMDB_URL")
                    .unwrap_or_else(|| DEFAULT_TMDB_URL.to_string()),
                token,
            },
            (None, Some(list)) => MovieSource::Static(parse_catalog(&list)?),
            (None, None) => return Err(ConfigError::MissingMovieSource),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingMovieSources),
        };

        let offset_minutes: i32 = env.parse("MATINEE_UTC_OFFSET_MINUTES")?.unwrap_or(0);
        let utc_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                invalid(
                    "MATINEE_UTC_OFFSET_MINUTES",
                    &offset_minutes.to_string(),
                    "offset must be within ±24h",
                )
            })?;

        let cancellation = match env.get("MATINEE_CANCELLATION").as_deref() {
            None | Some("anytime") => CancellationPolicy::Anytime,
            Some("before_start") => CancellationPolicy::BeforeStart,
            Some(other) => {
                return Err(invalid(
                    "MATINEE_CANCELLATION",
                    other,
                    "expected anytime or before_start",
                ));
            }
        };
        let alignment = match env.get("MATINEE_SLOT_ALIGNMENT").as_deref() {
            None | Some("follow") => SlotAlignment::FollowReservation,
            Some("grid") => SlotAlignment::Grid,
            Some(other) => {
                return Err(invalid(
                    "MATINEE_SLOT_ALIGNMENT",
                    other,
                    "expected follow or grid",
                ));
            }
        };

        let lookup_timeout_ms: u64 = env.parse("MATINEE_LOOKUP_TIMEOUT_MS")?.unwrap_or(5000);
        if lookup_timeout_ms == 0 {
            return Err(invalid("MATINEE_LOOKUP_TIMEOUT_MS", "0", "must be positive"));
        }

        Ok(Self {
            bind: env.get("MATINEE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: env.parse("MATINEE_PORT")?.unwrap_or(5434),
            data_dir: PathBuf::from(env.get("MATINEE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: env.get("MATINEE_PASSWORD").unwrap_or_else(|| "matinee".into()),
            max_connections: env.parse("MATINEE_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: env.parse("MATINEE_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: env.parse("MATINEE_METRICS_PORT")?,
            tls,
            movies,
            policy: BookingPolicy {
                lookup_timeout: Duration::from_millis(lookup_timeout_ms),
                utc_offset,
                cancellation,
                alignment,
            },
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

struct Env<'a> {
    get: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// Unset and blank both read as `None`.
    fn get(&self, var: &str) -> Option<String> {
        (self.get)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(var)
            .map(|raw| raw.parse::<T>().map_err(|e| invalid(var, &raw, e)))
            .transpose()
    }
}

fn invalid(var: &'static str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_catalog(list: &str) -> Result<Vec<MovieId>, ConfigError> {
    let ids = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<MovieId>() {
            Ok(id) if id > 0 => Ok(id),
            Ok(_) => Err(invalid("MATINEE_MOVIE_CATALOG", s, "ids must be positive")),
            Err(e) => Err(invalid("MATINEE_MOVIE_CATALOG", s, e)),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(invalid("MATINEE_MOVIE_CATALOG", list, "no movie ids"));
    }
    Ok(ids)
}
