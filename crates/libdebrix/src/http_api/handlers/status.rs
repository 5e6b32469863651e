use std::str::FromStr;
use std::time::Instant;

use axum::extract::{Query, State};
use debrix_core::{InfoHash, StreamId};
use serde::Deserialize;

use super::ApiState;
use crate::debrid::{Credential, ProviderTag};
use crate::{ApiError, Error};

// Big Buck Bunny; a swarm every provider has cached since forever.
const FIXTURE_HASH: &str = "DD8255ECDC7CA55FB0BBF81323D87062DB1F6D1C";
const FIXTURE_ID: &str = "tt1254207";

#[derive(Deserialize)]
pub(crate) struct StatusParams {
    imdbid: Option<String>,
    rdtoken: Option<String>,
    adkey: Option<String>,
    pmkey: Option<String>,
}

/// Diagnostic probe: runs every indexer and every supplied debrid credential
/// sequentially against a known-good fixture and reports per-component
/// timings. Meant for an operator with curl, not for players.
pub(crate) async fn h_status(
    State(session): State<ApiState>,
    Query(params): Query<StatusParams>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let id: StreamId = params
        .imdbid
        .as_deref()
        .unwrap_or(FIXTURE_ID)
        .parse()
        .map_err(|e: debrix_core::Error| Error::BadRequest(e.to_string()))?;
    let fixture_hash =
        InfoHash::from_str(FIXTURE_HASH).map_err(|e| Error::Infra(anyhow::Error::new(e)))?;

    let mut components = Vec::new();

    for source in session.aggregator().sources() {
        let started = Instant::now();
        let report = match source.find(&id).await {
            Ok(records) => serde_json::json!({
                "component": format!("indexer-{}", source.name()),
                "ok": true,
                "duration_ms": started.elapsed().as_millis() as u64,
                "results": records.len(),
                "sample": records.first().map(|r| r.title()),
            }),
            Err(e) => serde_json::json!({
                "component": format!("indexer-{}", source.name()),
                "ok": false,
                "duration_ms": started.elapsed().as_millis() as u64,
                "error": format!("{e:#}"),
            }),
        };
        components.push(report);
    }

    let credentials = [
        (ProviderTag::RealDebrid, params.rdtoken.as_ref()),
        (ProviderTag::AllDebrid, params.adkey.as_ref()),
        (ProviderTag::Premiumize, params.pmkey.as_ref()),
    ];
    for (tag, secret) in credentials {
        let Some(secret) = secret else {
            continue;
        };
        let client = session.debrid(tag)?;
        let cred = Credential::new(secret.clone());
        let started = Instant::now();
        let result = async {
            client.test_credential(&cred).await?;
            client
                .check_instant_availability(&cred, &[fixture_hash])
                .await
        }
        .await;
        let report = match result {
            Ok(available) => serde_json::json!({
                "component": format!("debrid-{tag}"),
                "ok": true,
                "duration_ms": started.elapsed().as_millis() as u64,
                "fixture_available": !available.is_empty(),
            }),
            Err(e) => serde_json::json!({
                "component": format!("debrid-{tag}"),
                "ok": false,
                "duration_ms": started.elapsed().as_millis() as u64,
                "error": format!("{e:#}"),
            }),
        };
        components.push(report);
    }

    Ok(axum::Json(serde_json::json!({ "components": components })))
}
