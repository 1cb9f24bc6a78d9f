//! The two ways of calling a function running in the emulator:
//! - directly via the Lambda Invoke API, decoding the HTTP API response envelope
//! - via the HTTP API front end, returning the response as is

use crate::{Error, Result};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use uuid::Uuid;

/// Request or response headers, name -> value.
pub type Headers = BTreeMap<String, String>;

/// Query string parameters, name -> value.
pub type QueryParams = BTreeMap<String, String>;

/// Set by the Invoke API when the function failed, e.g. `Unhandled`.
const FUNCTION_ERROR_HEADER: &str = "x-amz-function-error";

/// Standard alphabet, padding optional.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The decoded result of a direct invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeResponse {
    pub status: u16,
    /// Always empty: headers from the function response are not passed on.
    pub headers: Headers,
    pub body: String,
}

/// The response of a function behind an HTTP API, as returned by the Invoke API.
/// See https://docs.aws.amazon.com/apigateway/latest/developerguide/http-api-develop-integrations-lambda.html
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    status_code: u16,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    is_base64_encoded: bool,
}

/// A minimal HTTP API payload v2.0 event for a GET request.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GatewayEvent<'a> {
    version: &'static str,
    route_key: &'static str,
    raw_path: &'a str,
    raw_query_string: String,
    headers: &'a Headers,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_string_parameters: Option<&'a QueryParams>,
    request_context: RequestContext<'a>,
    is_base64_encoded: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RequestContext<'a> {
    account_id: &'static str,
    api_id: &'static str,
    domain_name: String,
    http: HttpContext<'a>,
    request_id: String,
    route_key: &'static str,
    stage: &'static str,
    time_epoch: u128,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct HttpContext<'a> {
    method: &'static str,
    path: &'a str,
    protocol: &'static str,
    source_ip: &'static str,
    user_agent: &'static str,
}

/// Sends requests to a running emulator.
/// Cheap to clone. Concurrent calls share the same connection pool.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    /// E.g. `http://127.0.0.1:3000`
    base_url: String,
    /// E.g. `127.0.0.1:3000`
    authority: String,
    invoke_client: Client<HttpConnector, Full<Bytes>>,
    http_client: Client<HttpConnector, Empty<Bytes>>,
}

impl Dispatcher {
    pub fn new(host: &str, port: u16) -> Self {
        let authority = format!("{host}:{port}");
        Self {
            base_url: format!("http://{authority}"),
            authority,
            invoke_client: Client::builder(TokioExecutor::new()).build_http(),
            http_client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Invokes the function with the given ID directly, as if the HTTP API received `GET path`.
    /// If the envelope says the body is base64 encoded, it is decoded before returning.
    pub async fn send_request(
        &self,
        function_id: &str,
        path: &str,
        headers: Option<&Headers>,
        query: Option<&QueryParams>,
    ) -> Result<InvokeResponse> {
        if function_id.is_empty() || function_id.contains('/') {
            return Err(Error::InvalidRequest(format!("Invalid function ID: {function_id:?}")));
        }

        let payload = to_payload(&gateway_event(&self.authority, path, headers, query))?;
        let uri = format!("{}/2015-03-31/functions/{function_id}/invocations", self.base_url);
        debug!("Invoking {uri}");

        let req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .header("x-amz-invocation-type", "RequestResponse")
            .body(Full::new(Bytes::from(payload)))?;

        let resp = self.invoke_client.request(req).await?;
        let status = resp.status();
        let function_error = resp
            .headers()
            .get(FUNCTION_ERROR_HEADER)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
        let body = resp.into_body().collect().await?.to_bytes();

        if !status.is_success() {
            return Err(Error::InvokeStatus {
                function: function_id.to_owned(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        if let Some(kind) = function_error {
            return Err(Error::FunctionError {
                function: function_id.to_owned(),
                kind,
                payload: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        debug!("Invoke response: {}", String::from_utf8_lossy(&body));

        decode_envelope(&body)
    }

    /// Sends `GET path` to the HTTP API front end of the emulator and returns the response unchanged.
    pub async fn send_api_gw_request(&self, path: &str, headers: Option<&Headers>) -> Result<Response<Bytes>> {
        let uri = format!("{}{}", self.base_url, absolute(path));
        debug!("GET {uri}");

        let mut req = Request::builder().method(Method::GET).uri(uri);
        for (name, value) in headers.into_iter().flatten() {
            req = req.header(name.as_str(), value.as_str());
        }
        let req = req.body(Empty::new())?;

        let (parts, body) = self.http_client.request(req).await?.into_parts();
        let body = body.collect().await?.to_bytes();

        debug!("HTTP API response: {} {}B", parts.status, body.len());

        Ok(Response::from_parts(parts, body))
    }
}

/// Parses the Invoke API response and decodes the body.
fn decode_envelope(payload: &[u8]) -> Result<InvokeResponse> {
    let envelope: Envelope = serde_json::from_slice(payload)?;
    let body = decode_body(envelope.body.unwrap_or_default(), envelope.is_base64_encoded)?;

    Ok(InvokeResponse {
        status: envelope.status_code,
        headers: Headers::new(),
        body,
    })
}

/// Returns the body as is or base64-decoded, depending on the flag.
/// Decoded bytes that are not valid UTF-8 are replaced with U+FFFD, so binary bodies come back lossy.
pub fn decode_body(body: String, is_base64_encoded: bool) -> Result<String> {
    if !is_base64_encoded {
        return Ok(body);
    }

    Ok(String::from_utf8_lossy(&BODY_ENGINE.decode(body.as_bytes())?).into_owned())
}

fn to_payload<T: Serialize>(event: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(event).map_err(Error::Payload)
}

fn absolute(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        ["/", path].concat()
    }
}

/// Values are used as is, so they should already be URL-encoded if they need to be.
fn raw_query_string(query: Option<&QueryParams>) -> String {
    query
        .into_iter()
        .flatten()
        .map(|(k, v)| [k.as_str(), "=", v.as_str()].concat())
        .collect::<Vec<_>>()
        .join("&")
}

fn gateway_event<'a>(
    authority: &str,
    path: &'a str,
    headers: Option<&'a Headers>,
    query: Option<&'a QueryParams>,
) -> GatewayEvent<'a> {
    static NO_HEADERS: Headers = Headers::new();

    let time_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();

    GatewayEvent {
        version: "2.0",
        route_key: "$default",
        raw_path: path,
        raw_query_string: raw_query_string(query),
        headers: headers.unwrap_or(&NO_HEADERS),
        query_string_parameters: query.filter(|q| !q.is_empty()),
        request_context: RequestContext {
            account_id: "123456789012",
            api_id: "local",
            domain_name: authority.to_owned(),
            http: HttpContext {
                method: "GET",
                path,
                protocol: "HTTP/1.1",
                source_ip: "127.0.0.1",
                user_agent: "lambda-local-stack",
            },
            request_id: Uuid::new_v4().to_string(),
            route_key: "$default",
            stage: "$default",
            time_epoch,
        },
        is_base64_encoded: false,
    }
}
