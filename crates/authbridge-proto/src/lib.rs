//! Generated tonic bindings for the external processing gRPC contract
//! the Filter speaks with Envoy, plus small constructors used on both
//! the admit/deny/exchange paths so call sites don't hand-build the
//! `oneof` nesting every time.

pub mod proto {
    tonic::include_proto!("authbridge.ext_proc.v1");
}

pub use proto::external_processor_client::ExternalProcessorClient;
pub use proto::external_processor_server::{ExternalProcessor, ExternalProcessorServer};
pub use proto::{
    processing_request, processing_response, BodyResponse, CommonResponse, HeaderMap,
    HeaderMutation, HeaderValue, HeaderValueOption, HeadersResponse, HttpBody, HttpHeaders,
    HttpStatus, HttpTrailers, ImmediateResponse, ProcessingRequest, ProcessingResponse,
    TrailersResponse,
};

/// Reads a header value by case-insensitive name out of an ext-proc
/// `HeaderMap`. Envoy's external processor contract carries headers as
/// a flat list rather than a native map, so lookups are linear.
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .headers
        .iter()
        .find(|h| h.key.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// A `CONTINUE` response that removes the given headers and optionally
/// sets others, used for the "admit with marker stripped" and
/// "exchange succeeded, rewrite authorization" paths.
pub fn header_mutation_response(
    set_headers: Vec<(String, String)>,
    remove_headers: Vec<String>,
) -> ProcessingResponse {
    let header_mutation = HeaderMutation {
        set_headers: set_headers
            .into_iter()
            .map(|(key, value)| HeaderValueOption {
                header: Some(HeaderValue { key, value }),
                append: false,
            })
            .collect(),
        remove_headers,
    };

    ProcessingResponse {
        response: Some(processing_response::Response::RequestHeaders(
            HeadersResponse {
                response: Some(CommonResponse {
                    status: 0,
                    header_mutation: Some(header_mutation),
                }),
            },
        )),
    }
}

/// An immediate (terminating) response, used for inbound denials.
pub fn immediate_response(status_code: u32, json_body: String) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(processing_response::Response::ImmediateResponse(
            ImmediateResponse {
                status: Some(HttpStatus { code: status_code }),
                headers: Some(HeaderMutation {
                    set_headers: vec![HeaderValueOption {
                        header: Some(HeaderValue {
                            key: "content-type".to_string(),
                            value: "application/json".to_string(),
                        }),
                        append: false,
                    }],
                    remove_headers: vec![],
                }),
                body: json_body.into_bytes(),
            },
        )),
    }
}

/// An empty `ResponseHeaders` response: `ResponseHeaders` events are
/// always echoed without mutation (spec.md §4.D.2/§4.D.6).
pub fn empty_response_headers() -> ProcessingResponse {
    ProcessingResponse {
        response: Some(processing_response::Response::ResponseHeaders(
            HeadersResponse { response: None },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_value_is_case_insensitive() {
        let headers = HeaderMap {
            headers: vec![HeaderValue {
                key: "Authorization".to_string(),
                value: "Bearer abc".to_string(),
            }],
        };
        assert_eq!(header_value(&headers, "authorization"), Some("Bearer abc"));
    }

    #[test]
    fn header_mutation_response_builds_remove_and_set_lists() {
        let response = header_mutation_response(
            vec![("authorization".to_string(), "Bearer new".to_string())],
            vec!["x-authbridge-direction".to_string()],
        );
        match response.response {
            Some(processing_response::Response::RequestHeaders(HeadersResponse {
                response: Some(common),
            })) => {
                let mutation = common.header_mutation.expect("mutation");
                assert_eq!(mutation.remove_headers, vec!["x-authbridge-direction"]);
                assert_eq!(mutation.set_headers.len(), 1);
            }
            _ => panic!("unexpected response shape"),
        }
    }
}
