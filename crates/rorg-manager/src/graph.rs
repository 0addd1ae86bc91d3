//! Dependency-graph validation.
//!
//! The request graph (issuer → target) must stay a DAG: activation
//! recurses through `implied_dependencies` and group membership, so a
//! cycle would recurse forever.  Cycles are therefore rejected when a
//! service is created or updated, the only points where edges appear.

use std::collections::{HashMap, HashSet};

use rorg_error::{Error, Result};
use rorg_model::{ServiceId, ServiceOptions};

use crate::service::Service;

/// Refuse `candidate` if adding (or, on update, replacing) its edges
/// would close a dependency cycle.
///
/// Only the subgraph reachable from the candidate needs visiting: the
/// pre-existing graph is acyclic, so any new cycle passes through the
/// candidate itself.  Edges naming not-yet-created services are kept;
/// they simply have no outgoing edges yet.
pub(crate) fn reject_cycles(
    services: &HashMap<ServiceId, Service>,
    candidate: &ServiceOptions,
) -> Result<()> {
    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    visit(&candidate.id, services, candidate, &mut visiting, &mut done)
}

/// Depth-first walk with an explicit "on the current path" set.
fn visit(
    id: &ServiceId,
    services: &HashMap<ServiceId, Service>,
    candidate: &ServiceOptions,
    visiting: &mut HashSet<ServiceId>,
    done: &mut HashSet<ServiceId>,
) -> Result<()> {
    if done.contains(id) {
        return Ok(());
    }
    if !visiting.insert(id.clone()) {
        return Err(Error::ServiceUnsupportedOptions(format!(
            "dependency cycle involving {}",
            id
        )));
    }
    // The candidate's edges win over whatever is currently registered
    // under its id, so updates are checked against the options as they
    // would be, not as they are.
    let edges: Vec<ServiceId> = if id == &candidate.id {
        candidate.dependency_edges().cloned().collect()
    } else {
        services
            .get(id)
            .map(|s| s.state.options.dependency_edges().cloned().collect())
            .unwrap_or_default()
    };
    for next in &edges {
        visit(next, services, candidate, visiting, done)?;
    }
    visiting.remove(id);
    done.insert(id.clone());
    Ok(())
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::service::Backend;
    use rorg_model::{ServiceState, ServiceStatus, ServiceType};

    /// Shorthand for tests.
    fn sid(s: &str) -> ServiceId {
        ServiceId::parse(s).unwrap()
    }

    /// A registered group-backed service with the given implied edges.
    fn registered(id: &str, implied: &[&str]) -> (ServiceId, Service) {
        let mut options = ServiceOptions::minimal(sid(id), ServiceType::Group);
        options.implied_dependencies = implied.iter().map(|s| sid(s)).collect();
        let service = Service {
            state: ServiceState::initial(options, ServiceStatus::Stopped),
            backend: Backend::Group,
        };
        (sid(id), service)
    }

    /// Candidate options with the given implied edges.
    fn candidate(id: &str, implied: &[&str]) -> ServiceOptions {
        let mut options = ServiceOptions::minimal(sid(id), ServiceType::Group);
        options.implied_dependencies = implied.iter().map(|s| sid(s)).collect();
        options
    }

    #[test]
    fn acyclic_graphs_pass() {
        let services: HashMap<_, _> = [
            registered("a:x", &["a:y"]),
            registered("a:y", &["a:z"]),
            registered("a:z", &[]),
        ]
        .into_iter()
        .collect();
        assert!(reject_cycles(&services, &candidate("a:w", &["a:x", "a:z"])).is_ok());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let services = HashMap::new();
        let e = reject_cycles(&services, &candidate("a:x", &["a:x"])).unwrap_err();
        assert_eq!(e.code(), rorg_error::ResultCode::ServiceUnsupportedOptions);
    }

    #[test]
    fn two_step_cycle_is_rejected() {
        let services: HashMap<_, _> = [registered("a:x", &["a:y"]), registered("a:y", &[])]
            .into_iter()
            .collect();
        // a:y -> a:x -> a:y
        assert!(reject_cycles(&services, &candidate("a:y", &["a:x"])).is_err());
    }

    #[test]
    fn edges_to_unknown_services_are_fine() {
        let services = HashMap::new();
        assert!(reject_cycles(&services, &candidate("a:x", &["not:yet"])).is_ok());
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let services: HashMap<_, _> = [
            registered("a:l", &["a:sink"]),
            registered("a:r", &["a:sink"]),
            registered("a:sink", &[]),
        ]
        .into_iter()
        .collect();
        assert!(reject_cycles(&services, &candidate("a:top", &["a:l", "a:r"])).is_ok());
    }

    #[test]
    fn update_is_checked_with_replacement_edges() {
        // Registered: a:x -> a:y.  Updating a:y to point at a:x closes
        // the loop even though a:y currently has no edges.
        let services: HashMap<_, _> = [registered("a:x", &["a:y"]), registered("a:y", &[])]
            .into_iter()
            .collect();
        assert!(reject_cycles(&services, &candidate("a:y", &["a:x"])).is_err());
        // And dropping the offending edge passes.
        assert!(reject_cycles(&services, &candidate("a:y", &["a:z"])).is_ok());
    }
}
