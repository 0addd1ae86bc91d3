//! Message types used on rorg's RPC wire.
//!
//! One request envelope arrives per message: a client-chosen id plus a
//! method tag and its parameters.  Every response echoes the id and
//! carries a [`ResultCode`], an optional error message, and the
//! method's payload flattened into the envelope.

use rorg_error::{Error, ResultCode};
use rorg_model::{DelayedAction, ServiceId, ServiceOptions, ServiceRequest, ServiceRequestId, ServiceState};
use serde::{Deserialize, Serialize};

/// A client-chosen identifier linking a response to its request.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MsgId {
    /// A client-provided string.
    Str(Box<str>),
    /// A client-provided integer.
    Int(i64),
}

/// How `QueryTotalResourceUsage` should gather its numbers.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum CollectMethod {
    /// Sum the per-service readings from the registry.
    SumIndividual,
    /// Read the cached host-wide sample.
    Psutil,
}

/// The method tag and parameters of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Method {
    /// Create a service from the given options.
    CreateService {
        /// The options to create from.
        options: ServiceOptions,
    },
    /// Read one service's authoritative state.
    QueryService {
        /// The service to query.
        id: ServiceId,
    },
    /// Replace a service's options.
    UpdateService {
        /// The new options; the id names the service to update.
        options: ServiceOptions,
    },
    /// Remove a service, cascading through whatever it requested.
    RemoveService {
        /// The service to remove.
        id: ServiceId,
    },
    /// Issue a request on behalf of its issuer.
    RequestService {
        /// The request to issue.
        request: ServiceRequest,
        /// Wait server-side for the returned delayed actions.
        #[serde(default)]
        wait_for_ready: bool,
    },
    /// Release a previously issued request.
    ReleaseService {
        /// The id of the request to release.
        request_id: ServiceRequestId,
    },
    /// List the ids of all managed services.
    ListServices,
    /// Read one service's resource usage.
    QueryServiceResourceUsage {
        /// The service to read.
        id: ServiceId,
    },
    /// Read host-level resource usage.
    QueryTotalResourceUsage {
        /// How to gather the numbers.
        collect_method: CollectMethod,
    },
}

/// A single request received from an RPC client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// The client's identifier for this request.
    pub id: MsgId,
    /// What to do.
    #[serde(flatten)]
    pub method: Method,
}

/// The method-specific payload of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum ResponseBody {
    /// `QueryService`: the service's state record.
    Service {
        /// The authoritative state.
        service_state: ServiceState,
    },
    /// `ListServices`: every managed id.
    Services {
        /// The ids, in canonical order.
        services: Vec<ServiceId>,
    },
    /// `RequestService` without `wait_for_ready`: the actions the
    /// client may wait on.
    DelayedActions {
        /// The pending readiness conditions.
        delayed_actions: Vec<DelayedAction>,
    },
    /// The resource-usage queries.
    Usage {
        /// CPU usage in logical-core units, when available.
        cpu_usage: Option<f64>,
        /// Memory usage in bytes, when available.
        memory_usage: Option<u64>,
    },
}

/// A response to send to an RPC client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echo of the request id; absent when the request could not even
    /// be parsed far enough to recover one.
    pub id: Option<MsgId>,
    /// The outcome code.
    pub result: ResultCode,
    /// Human-readable failure description, on non-`Ok` outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Method-specific payload, on `Ok` outcomes that have one.
    #[serde(flatten)]
    pub body: Option<ResponseBody>,
}

impl RpcResponse {
    /// A successful response.
    pub fn ok(id: MsgId, body: Option<ResponseBody>) -> RpcResponse {
        RpcResponse {
            id: Some(id),
            result: ResultCode::Ok,
            error_message: None,
            body,
        }
    }

    /// A failed response carrying the error's code and message.
    pub fn error(id: MsgId, error: &Error) -> RpcResponse {
        RpcResponse {
            id: Some(id),
            result: error.code(),
            error_message: Some(error.to_string()),
            body: None,
        }
    }

    /// The response for a message that did not parse as a request.
    pub fn unparseable(detail: &serde_json::Error) -> RpcResponse {
        RpcResponse {
            id: None,
            result: ResultCode::Unknown,
            error_message: Some(format!("could not parse request: {}", detail)),
            body: None,
        }
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn parse_request_envelopes() {
        let request: RpcRequest = serde_json::from_str(
            r#"{"id": 7, "method": "query_service", "params": {"id": "base:roscore"}}"#,
        )
        .unwrap();
        assert_eq!(request.id, MsgId::Int(7));
        assert_eq!(
            request.method,
            Method::QueryService {
                id: ServiceId::parse("base:roscore").unwrap()
            }
        );

        let request: RpcRequest =
            serde_json::from_str(r#"{"id": "a", "method": "list_services"}"#).unwrap();
        assert_eq!(request.method, Method::ListServices);

        let request: RpcRequest = serde_json::from_str(
            r#"{
                "id": 1,
                "method": "request_service",
                "params": {
                    "request": {
                        "issuer": "__builtin:__operator",
                        "uuid": "r1",
                        "targets": ["base:trigger_ui"]
                    },
                    "wait_for_ready": true
                }
            }"#,
        )
        .unwrap();
        match request.method {
            Method::RequestService {
                request,
                wait_for_ready,
            } => {
                assert!(wait_for_ready);
                assert_eq!(request.id().uuid(), "r1");
            }
            other => panic!("parsed as {:?}", other),
        }
    }

    #[test]
    fn wait_for_ready_defaults_to_false() {
        let request: RpcRequest = serde_json::from_str(
            r#"{
                "id": 1,
                "method": "request_service",
                "params": {
                    "request": {"issuer": "__builtin:__operator", "uuid": "r1", "targets": []}
                }
            }"#,
        )
        .unwrap();
        assert!(matches!(
            request.method,
            Method::RequestService {
                wait_for_ready: false,
                ..
            }
        ));
    }

    #[test]
    fn responses_flatten_their_payload() {
        let response = RpcResponse::ok(
            MsgId::Int(7),
            Some(ResponseBody::Services {
                services: vec![ServiceId::parse("base:roscore").unwrap()],
            }),
        );
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""result":"OK""#));
        assert!(json.contains(r#""services":["base:roscore"]"#));
        assert!(!json.contains("error_message"));
    }

    #[test]
    fn error_responses_carry_code_and_message() {
        let response = RpcResponse::error(
            MsgId::Str("q".into()),
            &Error::ServiceNotFound("service base:x not found".into()),
        );
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""result":"SERVICE_NOT_FOUND""#));
        assert!(json.contains("base:x"));
    }

    #[test]
    fn collect_method_wire_form() {
        assert_eq!(
            serde_json::to_string(&CollectMethod::SumIndividual).unwrap(),
            r#""sum_individual""#
        );
        let method: CollectMethod = serde_json::from_str(r#""psutil""#).unwrap();
        assert_eq!(method, CollectMethod::Psutil);
    }
}
