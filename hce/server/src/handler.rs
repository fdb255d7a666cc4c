use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, BufMut as _};
use futures::{Stream, TryStreamExt as _};
use log::{error, info};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::error::Category;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

use hce::{BatchRunner, Probe, ProbeOutcome};

/// Largest accepted request body
pub(crate) const MAX_BODY_BYTES: usize = 1_048_576;

const DOMAINS_FIELD: &str = "Domains";
const FIELDS: &[&str] = &[DOMAINS_FIELD];

pub(crate) struct AppState<P> {
    pub(crate) runner: BatchRunner<P>,
}

#[derive(Debug, Default)]
struct DomainList {
    domains: Vec<String>,
}

// keys match "Domains" in any case, null is an empty list, the last key wins
impl<'de> Deserialize<'de> for DomainList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DomainListVisitor;

        impl<'de> Visitor<'de> for DomainListVisitor {
            type Value = DomainList;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an object with a list of domain names")
            }

            fn visit_map<A>(self, mut map: A) -> Result<DomainList, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut list = DomainList::default();
                while let Some(key) = map.next_key::<String>()? {
                    if !key.eq_ignore_ascii_case(DOMAINS_FIELD) {
                        return Err(de::Error::unknown_field(&key, FIELDS));
                    }
                    let domains: Option<Vec<String>> = map.next_value()?;
                    list.domains = domains.unwrap_or_default();
                }
                Ok(list)
            }
        }

        deserializer.deserialize_struct("DomainList", FIELDS, DomainListVisitor)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CheckResponse {
    data: BTreeMap<String, ProbeOutcome>,
    request_time: String,
}

/// Why a request was turned down, displayed as the response body
#[derive(Debug, Error, PartialEq, Eq)]
enum RequestError {
    #[error("Content-Type header is not application/json")]
    UnsupportedMediaType,
    #[error("Request body contains badly-formed JSON (at position {0})")]
    Syntax(usize),
    #[error("Request body contains badly-formed JSON")]
    UnexpectedEof,
    #[error("Request body contains an invalid value for the {0:?} field (at position {1})")]
    InvalidValue(&'static str, usize),
    #[error("Request body contains unknown field {0:?}")]
    UnknownField(String),
    #[error("Request body must not be empty")]
    Empty,
    #[error("Request body must not be larger than 1MB")]
    TooLarge,
    #[error("Internal Server Error")]
    Internal,
}

impl RequestError {
    fn status(&self) -> StatusCode {
        match self {
            RequestError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RequestError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RequestError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl Reply for RequestError {
    fn into_response(self) -> Response {
        let status = self.status();
        warp::reply::with_status(format!("{self}\n"), status).into_response()
    }
}

fn with_state<P>(
    state: Arc<AppState<P>>,
) -> impl Filter<Extract = (Arc<AppState<P>>,), Error = Infallible> + Clone
where
    P: Probe + 'static,
{
    warp::any().map(move || state.clone())
}

/// `POST /api/checker` with `{"Domains": [...]}`
pub(crate) fn checker_filter<P>(
    state: Arc<AppState<P>>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone
where
    P: Probe + 'static,
{
    warp::post()
        .and(warp::path!("api" / "checker"))
        .and(with_state(state))
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::body::stream())
        .and_then(
            |state: Arc<AppState<P>>, content_type: Option<String>, body| async move {
                Ok::<_, warp::Rejection>(check_domains(state, content_type, body).await)
            },
        )
}

async fn check_domains<P, S, B>(
    state: Arc<AppState<P>>,
    content_type: Option<String>,
    body: S,
) -> Response
where
    P: Probe + 'static,
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    let start = Instant::now();

    let domain_list = match decode_request(content_type.as_deref(), body).await {
        Ok(d) => d,
        Err(e) => return e.into_response(),
    };

    let data = state.runner.run(&domain_list.domains).await;
    let elapsed = start.elapsed();
    let response = CheckResponse {
        data,
        request_time: format!("{elapsed:?}"),
    };

    info!("request took {elapsed:?} to process");
    warp::reply::json(&response).into_response()
}

async fn decode_request<S, B>(
    content_type: Option<&str>,
    body: S,
) -> Result<DomainList, RequestError>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    if let Some(content_type) = content_type {
        if !is_json(content_type) {
            return Err(RequestError::UnsupportedMediaType);
        }
    }
    let body = read_body(body, MAX_BODY_BYTES).await?;
    decode_domains(&body)
}

// blank header is the same as no header
fn is_json(content_type: &str) -> bool {
    if content_type.trim().is_empty() {
        return true;
    }
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    media_type.eq_ignore_ascii_case("application/json")
}

async fn read_body<S, B>(body: S, limit: usize) -> Result<Vec<u8>, RequestError>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    futures::pin_mut!(body);

    let mut buf = Vec::new();
    while let Some(chunk) = body.try_next().await.map_err(|e| {
        error!("failed to read request body: {e}");
        RequestError::Internal
    })? {
        if buf.len() + chunk.remaining() > limit {
            return Err(RequestError::TooLarge);
        }
        buf.put(chunk);
    }
    Ok(buf)
}

fn decode_domains(body: &[u8]) -> Result<DomainList, RequestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(RequestError::Empty);
    }

    // anything after the first value is ignored
    let first = serde_json::Deserializer::from_slice(body)
        .into_iter::<DomainList>()
        .next()
        .ok_or(RequestError::Empty)?;
    first.map_err(|e| match e.classify() {
        Category::Syntax => RequestError::Syntax(offset(body, e.line(), e.column())),
        Category::Eof => RequestError::UnexpectedEof,
        Category::Data => match unknown_field(&e) {
            Some(field) => RequestError::UnknownField(field),
            None => {
                let position = offset(body, e.line(), e.column());
                RequestError::InvalidValue(DOMAINS_FIELD, position)
            }
        },
        Category::Io => {
            error!("failed to decode request body: {e}");
            RequestError::Internal
        }
    })
}

fn unknown_field(e: &serde_json::Error) -> Option<String> {
    let message = e.to_string();
    let rest = message.strip_prefix("unknown field `")?;
    rest.split('`').next().map(String::from)
}

// serde_json reports line and column, clients get a byte position
fn offset(body: &[u8], line: usize, column: usize) -> usize {
    let start: usize = body
        .split(|b| *b == b'\n')
        .take(line.saturating_sub(1))
        .map(|l| l.len() + 1)
        .sum();
    (start + column).min(body.len())
}
