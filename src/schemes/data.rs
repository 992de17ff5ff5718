//! `data:` URI resolver.
//!
//! ```text
//! data:<mediatype>[;param=value]*[;base64],<payload>
//! ```
//!
//! The payload is percent-decoded, then base64-decoded when flagged. An
//! empty payload is an empty body, never an error.

use base64::prelude::*;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::mediator::{Handler, HandlerResult, Mediator};
use crate::message::headers::CONTENT_TYPE;
use crate::message::{Request, Response};

const DEFAULT_MEDIA_TYPE: &str = "text/plain";

#[derive(Debug, Error)]
pub enum DataUriError {
    #[error("not a data URI")]
    NotData,

    #[error("data URI has no ',' before its payload")]
    MissingPayload,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A decoded `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    /// Media type without parameters, e.g. `text/html`.
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl DataUri {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

pub fn decode(uri: &str) -> Result<DataUri, DataUriError> {
    let rest = uri
        .get(..5)
        .filter(|prefix| prefix.eq_ignore_ascii_case("data:"))
        .map(|_| &uri[5..])
        .ok_or(DataUriError::NotData)?;
    let (meta, payload) = rest.split_once(',').ok_or(DataUriError::MissingPayload)?;

    let mut params = meta.split(';').map(str::trim);
    let media_type = match params.next() {
        Some(m) if !m.is_empty() => m.to_lowercase(),
        _ => DEFAULT_MEDIA_TYPE.to_string(),
    };
    let base64 = params.any(|p| p.eq_ignore_ascii_case("base64"));

    let decoded: Vec<u8> = percent_decode_str(payload).collect();
    let bytes = if base64 {
        BASE64_STANDARD.decode(decoded)?
    } else {
        decoded
    };
    Ok(DataUri { media_type, bytes })
}

/// Answers every `data:` request with its decoded payload.
#[derive(Debug, Default)]
pub struct DataResolver;

impl Handler for DataResolver {
    fn receive<'a>(&'a self, request: Request, _mediator: &'a Mediator) -> BoxFuture<'a, HandlerResult> {
        async move {
            let response = match decode(&request.uri()) {
                Ok(data) => Response::ok()
                    .header(CONTENT_TYPE, data.media_type.as_str())
                    .with_body(data.text()),
                Err(e) => {
                    tracing::debug!(error = %e, "Bad data URI");
                    Response::new(400, "bad request")
                }
            };
            Ok(response)
        }
        .boxed()
    }
}
