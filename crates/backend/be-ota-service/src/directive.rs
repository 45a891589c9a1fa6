//! Directives: commands sent to a client instead of a manifest.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::OtaError,
    manifest::format_timestamp,
    types::{ManifestRequest, ProtocolVersion},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Directive {
    NoUpdateAvailable,
    RollBackToEmbedded { parameters: RollbackParameters },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackParameters {
    pub commit_time: String,
}

impl Directive {
    pub fn is_no_update(&self) -> bool {
        matches!(self, Directive::NoUpdateAvailable)
    }
}

/// Protocol 0 has no wire form for "no update", so asking for one there is a bug.
pub fn no_update_available(protocol: ProtocolVersion) -> Result<Directive, OtaError> {
    if !protocol.supports_directives() {
        return Err(OtaError::NoUpdateUnsupported);
    }
    Ok(Directive::NoUpdateAvailable)
}

/// Directive for a bundle carrying the rollback marker. Yields
/// `NoUpdateAvailable` when the client already runs its embedded update.
pub fn build_rollback(
    request: &ManifestRequest,
    commit_time: DateTime<Utc>,
) -> Result<Directive, OtaError> {
    if !request.protocol_version.supports_directives() {
        return Err(OtaError::RollbackUnsupported);
    }

    let embedded = request
        .embedded_update_id
        .as_deref()
        .ok_or(OtaError::MissingEmbeddedUpdateId)?;

    if request.is_running(embedded) {
        return no_update_available(request.protocol_version);
    }

    Ok(Directive::RollBackToEmbedded {
        parameters: RollbackParameters {
            commit_time: format_timestamp(commit_time),
        },
    })
}
