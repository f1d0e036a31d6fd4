//! SDP offer/answer exchange over HTTP.

use tracing::debug;

use super::TransportError;

/// POST a local SDP offer to the negotiation endpoint and return the remote
/// answer SDP.
///
/// The body is raw SDP (`application/sdp`), authorized with a short-lived
/// bearer credential. Any non-success status is surfaced with the response
/// body attached; endpoints put the rejection reason there.
pub async fn exchange_sdp(
    client: &reqwest::Client,
    url: &str,
    bearer: &str,
    offer_sdp: &str,
) -> Result<String, TransportError> {
    debug!(%url, offer_bytes = offer_sdp.len(), "posting sdp offer");
    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {bearer}"))
        .header("Content-Type", "application/sdp")
        .body(offer_sdp.to_string())
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(TransportError::Rejected { status: status.as_u16(), body });
    }
    debug!(answer_bytes = body.len(), "received sdp answer");
    Ok(body)
}
