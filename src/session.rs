use chrono::NaiveDate;
use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ReportConfig;
use crate::error::{ReportError, ReportResult};

/// Per-request state threaded through the presentation calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub username: Option<String>,
    pub today: NaiveDate,
}

impl RequestContext {
    pub fn anonymous(today: NaiveDate) -> Self {
        RequestContext {
            request_id: Uuid::new_v4(),
            username: None,
            today,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    /// Drops the user; the request id and date stay.
    pub fn logout(&mut self) {
        if let Some(username) = self.username.take() {
            info!(request_id = %self.request_id, %username, "logged out");
        }
    }
}

pub fn password_digest(password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Checks a login against the configured allow-list of SHA-1 digests.
pub fn authenticate(
    config: &ReportConfig,
    username: &str,
    password: &str,
    today: NaiveDate,
) -> ReportResult<RequestContext> {
    let username = username.trim();
    let accepted = config
        .authorized_users
        .get(username)
        .is_some_and(|expected| *expected == password_digest(password));

    let mut context = RequestContext::anonymous(today);
    if !accepted {
        warn!(request_id = %context.request_id, %username, "login rejected");
        return Err(ReportError::Unauthorized);
    }
    context.username = Some(username.to_string());
    info!(request_id = %context.request_id, %username, "login accepted");
    Ok(context)
}
