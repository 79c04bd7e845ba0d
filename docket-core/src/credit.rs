//! Credit clearance precondition.
//!
//! Billing and credit accounting live outside this engine. The engine only
//! requires proof that an external check ran: [`CreditClearance`] is the
//! proof value, issued by the host's credit checker and consumed by
//! `request_analysis`. The type carries no accounting logic.

use crate::{Timestamp, WorkspaceId};
use chrono::Utc;

/// Proof that a workspace passed the external credit/quota check.
///
/// Deliberately not `Clone` and not serializable: a clearance is consumed by
/// exactly one analysis request and cannot be stashed or replayed.
#[derive(Debug)]
pub struct CreditClearance {
    workspace_id: WorkspaceId,
    granted_at: Timestamp,
}

impl CreditClearance {
    /// Issue a clearance for a workspace.
    ///
    /// Callable only by the host's credit checker after it has confirmed
    /// quota; the engine never calls this itself.
    pub fn granted(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            granted_at: Utc::now(),
        }
    }

    /// The workspace this clearance was issued for.
    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    /// When the clearance was issued.
    pub fn granted_at(&self) -> Timestamp {
        self.granted_at
    }
}
