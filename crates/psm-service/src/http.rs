//! `POST /rpc`: the envelope over HTTP.
//!
//! Every handled request answers `200` with a [`Reply`], including failed
//! actions and timeouts. Only a closed service answers with an HTTP error.
//! Malformed envelopes are rejected by the JSON extractor.

use axum::{Json, Router, extract::State, routing::post};
use tower_http::trace::TraceLayer;

use crate::{
  ServiceError, ServiceHandle,
  rpc::{Envelope, Reply},
};

pub fn rpc_router(handle: ServiceHandle) -> Router<()> {
  Router::new()
    .route("/rpc", post(rpc))
    .layer(TraceLayer::new_for_http())
    .with_state(handle)
}

async fn rpc(
  State(handle): State<ServiceHandle>,
  Json(envelope): Json<Envelope>,
) -> Result<Json<Reply>, ServiceError> {
  let id = envelope.id;
  match handle.dispatch(envelope).await {
    Ok(reply) => Ok(Json(reply)),
    Err(ServiceError::Closed) => Err(ServiceError::Closed),
    Err(err) => Ok(Json(Reply::failure(id, err))),
  }
}
