//! Plain-text responses sent to hubs and health checks.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use hubbub_core::CallbackResponse;

/// Content type of every response this service writes.
pub const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

/// Body of the liveness responder.
pub const LIVENESS_BODY: &str = "hubbub ok";

/// HTTP rendering of a [`CallbackResponse`].
#[derive(Debug)]
pub struct CallbackReply(pub CallbackResponse);

impl IntoResponse for CallbackReply {
    fn into_response(self) -> Response {
        let status = match self.0 {
            CallbackResponse::Ok { .. } => StatusCode::OK,
            CallbackResponse::BadRequest { .. } => StatusCode::BAD_REQUEST,
        };

        let body = match self.0 {
            CallbackResponse::Ok { body } => body,
            CallbackResponse::BadRequest { message } => message,
        };

        (status, [(header::CONTENT_TYPE, PLAIN_TEXT)], body).into_response()
    }
}
