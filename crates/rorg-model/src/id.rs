//! Service identifiers.

use std::fmt::{self, Display};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use rorg_error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Pattern for the canonical text form `ns0/ns1/.../nsK:name`.
///
/// Both namespace components and the name draw from `[A-Za-z0-9_-]`.
static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:[A-Za-z0-9_-]+/)*[A-Za-z0-9_-]+):([A-Za-z0-9_-]+)$")
        .expect("invalid ServiceId pattern")
});

/// Namespace reserved for services owned by the orchestrator itself.
const BUILTIN_NAMESPACE: &str = "__builtin";

/// Name of the meta service that stands in for the external operator.
const OPERATOR_NAME: &str = "__operator";

/// Identity of a managed service: an ordered namespace plus a name.
///
/// The canonical text form is `ns0/ns1:name`; parsing and display round
/// trip exactly, and the serde representation is the canonical string.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ServiceId {
    /// Ordered namespace components, outermost first.  Never empty.
    namespace: Vec<String>,
    /// The service's own name within its namespace.
    name: String,
}

impl ServiceId {
    /// Construct a `ServiceId` from parts, validating the alphabet.
    pub fn new<S: Into<String>>(namespace: Vec<S>, name: S) -> Result<ServiceId> {
        let namespace: Vec<String> = namespace.into_iter().map(Into::into).collect();
        let name = name.into();
        let candidate = ServiceId { namespace, name };
        // Re-validate through the canonical form so there is exactly one
        // definition of what an id may contain.
        ServiceId::parse(&candidate.to_string())
    }

    /// Parse the canonical text form.
    pub fn parse(s: &str) -> Result<ServiceId> {
        let caps = ID_PATTERN
            .captures(s)
            .ok_or_else(|| Error::InvalidServiceId(format!("{:?} is not a valid service id", s)))?;
        let namespace = caps[1].split('/').map(str::to_owned).collect();
        let name = caps[2].to_owned();
        Ok(ServiceId { namespace, name })
    }

    /// The id of the built-in meta service that represents the operator.
    pub fn operator() -> ServiceId {
        ServiceId {
            namespace: vec![BUILTIN_NAMESPACE.to_owned()],
            name: OPERATOR_NAME.to_owned(),
        }
    }

    /// Return true if this id lives in a system-owned namespace.
    ///
    /// Clients may not create, update or remove services there.
    pub fn is_builtin(&self) -> bool {
        self.namespace
            .first()
            .map(|ns| ns.starts_with(BUILTIN_NAMESPACE))
            .unwrap_or(false)
    }

    /// The namespace components, outermost first.
    pub fn namespace(&self) -> &[String] {
        &self.namespace
    }

    /// The service's name within its namespace.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace.join("/"), self.name)
    }
}

impl FromStr for ServiceId {
    type Err = Error;
    fn from_str(s: &str) -> Result<ServiceId> {
        ServiceId::parse(s)
    }
}

impl Serialize for ServiceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ServiceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ServiceId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        for s in [
            "base:roscore",
            "base/nav:amcl",
            "a/b/c/d:name",
            "with_under-score:x-1",
            "__builtin:__operator",
        ] {
            let id = ServiceId::parse(s).unwrap();
            assert_eq!(id.to_string(), s);
        }
    }

    #[test]
    fn parse_rejects_malformed() {
        for s in [
            "",
            ":",
            ":name",
            "ns:",
            "no-colon",
            "ns:name:extra",
            "ns/:name",
            "/ns:name",
            "ns:na me",
            "ns:na.me",
            "a//b:name",
            "ns:name\n",
        ] {
            let e = ServiceId::parse(s).unwrap_err();
            assert_eq!(e.code(), rorg_error::ResultCode::InvalidServiceId, "{:?}", s);
        }
    }

    #[test]
    fn parts() {
        let id = ServiceId::parse("base/nav:amcl").unwrap();
        assert_eq!(id.namespace(), ["base".to_owned(), "nav".to_owned()]);
        assert_eq!(id.name(), "amcl");
    }

    #[test]
    fn new_validates() {
        assert!(ServiceId::new(vec!["base"], "roscore").is_ok());
        assert!(ServiceId::new(vec!["ba se"], "roscore").is_err());
        assert!(ServiceId::new(Vec::<String>::new(), "roscore".to_owned()).is_err());
    }

    #[test]
    fn builtin_detection() {
        assert!(ServiceId::operator().is_builtin());
        assert!(ServiceId::parse("__builtin/probers:x").unwrap().is_builtin());
        assert!(!ServiceId::parse("base:roscore").unwrap().is_builtin());
    }

    #[test]
    fn serde_uses_canonical_string() {
        let id = ServiceId::parse("base/nav:amcl").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""base/nav:amcl""#);
        let back: ServiceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ServiceId>(r#""not an id""#).is_err());
    }

    #[test]
    fn ordering_is_stable() {
        let mut ids = vec![
            ServiceId::parse("b:x").unwrap(),
            ServiceId::parse("a:z").unwrap(),
            ServiceId::parse("a/b:y").unwrap(),
        ];
        ids.sort();
        let shown: Vec<String> = ids.iter().map(ToString::to_string).collect();
        // Vec ordering: a shorter namespace sorts before its extensions.
        assert_eq!(shown, ["a:z", "a/b:y", "b:x"]);
    }
}
