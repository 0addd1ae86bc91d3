//! Service requests: reference-counted claims on other services.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::ServiceId;

/// Request uuid used by a service for the claim on its own implied
/// dependencies.
pub const IMPLIED_REQUEST_UUID: &str = "__IMPLIED";

/// Identity of a request: the issuing service plus an opaque uuid.
///
/// Uniqueness is per issuer+uuid; the orchestrator never mints uuids
/// itself except for [`IMPLIED_REQUEST_UUID`].
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ServiceRequestId {
    /// The service on whose behalf the request was made.
    issuer: ServiceId,
    /// Opaque request identifier, chosen by the issuer.
    uuid: String,
}

impl ServiceRequestId {
    /// Construct a request id.
    pub fn new<S: Into<String>>(issuer: ServiceId, uuid: S) -> ServiceRequestId {
        ServiceRequestId {
            issuer,
            uuid: uuid.into(),
        }
    }

    /// The id for `issuer`'s claim on its implied dependencies.
    pub fn implied(issuer: ServiceId) -> ServiceRequestId {
        ServiceRequestId::new(issuer, IMPLIED_REQUEST_UUID)
    }

    /// The issuing service.
    pub fn issuer(&self) -> &ServiceId {
        &self.issuer
    }

    /// The opaque uuid.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}

impl Display for ServiceRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.issuer, self.uuid)
    }
}

/// A live claim by one service on a set of target services.
///
/// Targets are deduplicated (order preserving) at construction, and a
/// request may not name its own issuer as a target; the registry enforces
/// the latter when the request is acted upon.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawServiceRequest")]
pub struct ServiceRequest {
    /// The request's identity, inlined so the record renders as plain
    /// `issuer`/`uuid`/`targets` fields.
    #[serde(flatten)]
    id: ServiceRequestId,
    /// The services this request claims.
    targets: Vec<ServiceId>,
}

/// Deserialization shadow of [`ServiceRequest`]; lets `from` funnel wire
/// input through [`ServiceRequest::new`] so targets arrive deduplicated.
#[derive(Deserialize)]
struct RawServiceRequest {
    /// See [`ServiceRequest::id`].
    #[serde(flatten)]
    id: ServiceRequestId,
    /// See [`ServiceRequest::targets`].
    targets: Vec<ServiceId>,
}

impl From<RawServiceRequest> for ServiceRequest {
    fn from(raw: RawServiceRequest) -> ServiceRequest {
        ServiceRequest::new(raw.id, raw.targets)
    }
}

impl ServiceRequest {
    /// Construct a request, deduplicating targets while preserving the
    /// order of first appearance.
    pub fn new(id: ServiceRequestId, targets: Vec<ServiceId>) -> ServiceRequest {
        let mut deduped: Vec<ServiceId> = Vec::with_capacity(targets.len());
        for target in targets {
            if !deduped.contains(&target) {
                deduped.push(target);
            }
        }
        ServiceRequest {
            id,
            targets: deduped,
        }
    }

    /// The request's identity.
    pub fn id(&self) -> &ServiceRequestId {
        &self.id
    }

    /// The claimed targets, in order of first appearance.
    pub fn targets(&self) -> &[ServiceId] {
        &self.targets
    }
}

impl Display for ServiceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets: Vec<String> = self.targets.iter().map(ToString::to_string).collect();
        write!(f, "{} -> [{}]", self.id, targets.join(", "))
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;

    /// Shorthand for tests.
    fn sid(s: &str) -> ServiceId {
        ServiceId::parse(s).unwrap()
    }

    #[test]
    fn targets_are_deduplicated() {
        let req = ServiceRequest::new(
            ServiceRequestId::new(sid("__builtin:__operator"), "r1"),
            vec![sid("a:x"), sid("a:y"), sid("a:x"), sid("a:z"), sid("a:y")],
        );
        assert_eq!(req.targets(), &[sid("a:x"), sid("a:y"), sid("a:z")]);
    }

    #[test]
    fn implied_id() {
        let id = ServiceRequestId::implied(sid("base:roscore"));
        assert_eq!(id.uuid(), IMPLIED_REQUEST_UUID);
        assert_eq!(id.to_string(), "base:roscore[__IMPLIED]");
    }

    #[test]
    fn serde_round_trip_dedups() {
        let json = r#"{
            "issuer": "__builtin:__operator",
            "uuid": "r1",
            "targets": ["a:x", "a:x", "a:y"]
        }"#;
        let req: ServiceRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.id().uuid(), "r1");
        assert_eq!(req.targets(), &[sid("a:x"), sid("a:y")]);
        let back: ServiceRequest =
            serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        assert_eq!(back, req);
    }
}
