//! Delayed actions: wait-until-ready tokens returned by activation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rorg_error::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::ServiceId;

/// Poll grain used while waiting on a delayed action.
const WAIT_POLL: Duration = Duration::from_millis(250);

/// A token representing a condition the caller may choose to block on
/// before considering a freshly activated service ready.
///
/// Activation paths return these instead of blocking, so the RPC layer
/// can either wait server-side (`wait_for_ready`) or hand the list back
/// to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DelayedAction {
    /// Ready once the wall clock passes `deadline`.
    WaitUntilTimestamp {
        /// The instant the service is considered ready.
        deadline: DateTime<Utc>,
    },
    /// Ready once the named service reports a heartbeat.  Serializable,
    /// but waiting on it server-side is not implemented.
    WaitForServiceHeartbeat {
        /// The service whose heartbeat to wait for.
        service: ServiceId,
    },
}

impl DelayedAction {
    /// A `WaitUntilTimestamp` that fires `secs` seconds from now.
    pub fn wait_fixed(secs: f64) -> DelayedAction {
        let millis = (secs.max(0.0) * 1000.0).round() as i64;
        DelayedAction::WaitUntilTimestamp {
            deadline: Utc::now() + chrono::Duration::milliseconds(millis),
        }
    }

    /// Block until the condition holds, polling at a 250 ms grain.
    pub async fn wait(&self) -> Result<()> {
        match self {
            DelayedAction::WaitUntilTimestamp { deadline } => {
                while Utc::now() < *deadline {
                    tokio::time::sleep(WAIT_POLL).await;
                }
                Ok(())
            }
            DelayedAction::WaitForServiceHeartbeat { service } => Err(Error::Internal(format!(
                "waiting for a heartbeat from {} is not implemented",
                service
            ))),
        }
    }
}
