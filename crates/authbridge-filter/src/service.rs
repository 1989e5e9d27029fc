//! The `ExternalProcessor` tonic service: direction classification and
//! the two per-request state machines (spec.md §4.D).

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use authbridge_core::{ExchangeConfig, InboundPolicy, DIRECTION_HEADER, DIRECTION_INBOUND};
use authbridge_jwks::JwksCache;
use authbridge_proto::{
    empty_response_headers, header_mutation_response, header_value, immediate_response,
    processing_request, processing_response, BodyResponse, ExternalProcessor, HeaderMap,
    HeadersResponse, ProcessingRequest, ProcessingResponse, TrailersResponse,
};
use authbridge_resolver::Resolver;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::bootstrap::ExchangeConfigHandle;

const TOKEN_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const REQUESTED_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
const SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

pub struct FilterService {
    resolver: Arc<Resolver>,
    jwks: Option<Arc<JwksCache>>,
    inbound_policy: Option<InboundPolicy>,
    exchange_handle: Arc<ExchangeConfigHandle>,
    http_client: reqwest::Client,
}

impl FilterService {
    pub fn new(
        resolver: Arc<Resolver>,
        jwks: Option<Arc<JwksCache>>,
        inbound_policy: Option<InboundPolicy>,
        exchange_handle: Arc<ExchangeConfigHandle>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(TOKEN_EXCHANGE_TIMEOUT)
            .build()
            .expect("reqwest client with a fixed timeout should always build");
        Self {
            resolver,
            jwks,
            inbound_policy,
            exchange_handle,
            http_client,
        }
    }

    async fn handle_request_headers(&self, headers: HeaderMap) -> ProcessingResponse {
        let direction_is_inbound = header_value(&headers, DIRECTION_HEADER)
            .map(|value| value.eq_ignore_ascii_case(DIRECTION_INBOUND))
            .unwrap_or(false);

        if direction_is_inbound {
            self.inbound_validation(&headers).await
        } else {
            self.outbound_exchange(&headers).await
        }
    }

    /// spec.md §4.D.3
    async fn inbound_validation(&self, headers: &HeaderMap) -> ProcessingResponse {
        let (Some(policy), Some(jwks)) = (&self.inbound_policy, &self.jwks) else {
            return admit_response();
        };

        let Some(auth_header) = header_value(headers, "authorization") else {
            return deny("missing Authorization header");
        };

        let Some(token) = strip_bearer_prefix(auth_header) else {
            return deny("invalid Authorization header format");
        };

        if let Err(err) = jwks.get().await {
            tracing::warn!(error = %err, "jwks fetch failed during inbound validation");
            return deny("unable to fetch verification keys");
        }

        let header = match decode_header(token) {
            Ok(header) => header,
            Err(_) => return deny("invalid token header"),
        };
        let Some(kid) = header.kid else {
            return deny("token header is missing a key id");
        };
        let Some((decoding_key, algorithm)) = jwks.get_key(&kid) else {
            return deny("no matching verification key for token");
        };

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[policy.issuer.clone()]);
        if policy.expected_audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&[policy.expected_audience.clone()]);
        }

        match decode::<InboundClaims>(token, &decoding_key, &validation) {
            Ok(_) => admit_response(),
            Err(err) => {
                tracing::info!(error = %err, "inbound token rejected");
                deny(&inbound_rejection_message(&err))
            }
        }
    }

    /// spec.md §4.D.4
    async fn outbound_exchange(&self, headers: &HeaderMap) -> ProcessingResponse {
        let snapshot = self.exchange_handle.snapshot();
        let snapshot = self.resolve_override(headers, snapshot);

        if !snapshot.is_complete() {
            return passthrough_response();
        }

        let Some(auth_header) = header_value(headers, "authorization") else {
            return passthrough_response();
        };
        let Some(token) = strip_bearer_prefix(auth_header) else {
            return passthrough_response();
        };

        match self.exchange_token(&snapshot, token).await {
            Ok(new_token) => header_mutation_response(
                vec![("authorization".to_string(), format!("Bearer {new_token}"))],
                vec![],
            ),
            Err(err) => {
                tracing::warn!(error = %err, "token exchange failed; passing through original token");
                passthrough_response()
            }
        }
    }

    /// Optional resolver-driven override of the default exchange config
    /// for this request's destination host (spec.md §4.D.4 "optional
    /// enhancement").
    fn resolve_override(&self, headers: &HeaderMap, snapshot: ExchangeConfig) -> ExchangeConfig {
        let Some(host) = header_value(headers, ":authority").or_else(|| header_value(headers, "host"))
        else {
            return snapshot;
        };

        match self.resolver.resolve(host) {
            Some(route) if route.passthrough => ExchangeConfig::default(),
            Some(route) => snapshot.overridden_by_route(&route),
            None => snapshot,
        }
    }

    /// spec.md §4.D.5
    async fn exchange_token(
        &self,
        config: &ExchangeConfig,
        subject_token: &str,
    ) -> Result<String, ExchangeError> {
        let params = [
            ("grant_type", GRANT_TYPE),
            ("requested_token_type", REQUESTED_TOKEN_TYPE),
            ("subject_token", subject_token),
            ("subject_token_type", SUBJECT_TOKEN_TYPE),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("audience", config.target_audience.as_str()),
            ("scope", config.scopes.as_str()),
        ];

        let response = self
            .http_client
            .post(&config.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(ExchangeError::Request)?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(ExchangeError::BadStatus(response.status().as_u16()));
        }

        let body: TokenExchangeResponse =
            response.json().await.map_err(ExchangeError::Request)?;

        if body.access_token.trim().is_empty() {
            return Err(ExchangeError::EmptyAccessToken);
        }

        Ok(body.access_token)
    }
}

fn admit_response() -> ProcessingResponse {
    header_mutation_response(vec![], vec![DIRECTION_HEADER.to_string()])
}

fn passthrough_response() -> ProcessingResponse {
    header_mutation_response(vec![], vec![])
}

fn deny(message: &str) -> ProcessingResponse {
    let body = serde_json::to_string(&DenialBody {
        error: "unauthorized",
        message: message.to_string(),
    })
    .unwrap_or_else(|_| "{\"error\":\"unauthorized\"}".to_string());
    immediate_response(401, body)
}

fn strip_bearer_prefix(value: &str) -> Option<&str> {
    let mut parts = value.splitn(2, ' ');
    let scheme = parts.next()?;
    let token = parts.next()?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

fn inbound_rejection_message(err: &jsonwebtoken::errors::Error) -> String {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::InvalidIssuer => "invalid issuer".to_string(),
        ErrorKind::InvalidAudience => "invalid audience".to_string(),
        ErrorKind::InvalidSignature => "invalid signature".to_string(),
        ErrorKind::ExpiredSignature => "token expired".to_string(),
        _ => "token validation failed".to_string(),
    }
}

#[derive(Debug, Serialize)]
struct DenialBody {
    error: &'static str,
    message: String,
}

#[derive(Debug, Deserialize)]
struct InboundClaims {
    #[allow(dead_code)]
    #[serde(default)]
    exp: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
}

#[derive(Debug, thiserror::Error)]
enum ExchangeError {
    #[error("request to token endpoint failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("token endpoint returned status {0}")]
    BadStatus(u16),
    #[error("token endpoint response had an empty access_token")]
    EmptyAccessToken,
}

#[tonic::async_trait]
impl ExternalProcessor for FilterService {
    type ProcessStream = Pin<Box<dyn futures_util::Stream<Item = Result<ProcessingResponse, Status>> + Send + 'static>>;

    async fn process(
        &self,
        request: Request<Streaming<ProcessingRequest>>,
    ) -> Result<Response<Self::ProcessStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(16);
        let service = self.clone();

        tokio::spawn(async move {
            while let Some(message) = inbound.message().await.transpose() {
                let response = match message {
                    Ok(ProcessingRequest {
                        request: Some(processing_request::Request::RequestHeaders(headers)),
                    }) => {
                        let headers = headers.headers.unwrap_or_default();
                        Ok(service.handle_request_headers(headers).await)
                    }
                    Ok(ProcessingRequest {
                        request: Some(processing_request::Request::ResponseHeaders(_)),
                    }) => Ok(empty_response_headers()),
                    Ok(ProcessingRequest {
                        request: Some(processing_request::Request::RequestBody(_)),
                    }) => Ok(ProcessingResponse {
                        response: Some(processing_response::Response::RequestBody(
                            BodyResponse { response: None },
                        )),
                    }),
                    Ok(ProcessingRequest {
                        request: Some(processing_request::Request::ResponseBody(_)),
                    }) => Ok(ProcessingResponse {
                        response: Some(processing_response::Response::ResponseBody(
                            BodyResponse { response: None },
                        )),
                    }),
                    Ok(ProcessingRequest {
                        request: Some(processing_request::Request::RequestTrailers(_)),
                    }) => Ok(ProcessingResponse {
                        response: Some(processing_response::Response::RequestTrailers(
                            TrailersResponse {
                                header_mutation: None,
                            },
                        )),
                    }),
                    Ok(ProcessingRequest {
                        request: Some(processing_request::Request::ResponseTrailers(_)),
                    }) => Ok(ProcessingResponse {
                        response: Some(processing_response::Response::ResponseTrailers(
                            TrailersResponse {
                                header_mutation: None,
                            },
                        )),
                    }),
                    Ok(ProcessingRequest { request: None }) => {
                        continue;
                    }
                    Err(status) => Err(status),
                };

                if tx.send(response).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

impl Clone for FilterService {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            jwks: self.jwks.clone(),
            inbound_policy: self.inbound_policy.clone(),
            exchange_handle: self.exchange_handle.clone(),
            http_client: self.http_client.clone(),
        }
    }
}
