//! Administrative HTTP surface.
//!
//! Everything rides on two paths: `GET /` for status and monitoring, and
//! `POST /` with a `method` query parameter for mutations. Responses are
//! plain text (`OK`, `not blocked`, ...) except the status report, which is
//! JSON.

use crate::service::Service;
use http::{Method, Request, Response, StatusCode};
use std::collections::HashMap;
use tracing::info;

fn query_params(query: Option<&str>) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}

fn ok_resp(text: impl Into<String>) -> Response<String> {
    Response::new(text.into())
}

fn err_resp(code: StatusCode, text: impl Into<String>) -> Response<String> {
    let mut resp = Response::new(text.into());
    *resp.status_mut() = code;
    resp
}

impl Service {
    /// Handle one administrative HTTP request.
    pub async fn handle_http_request<B>(&self, req: Request<B>) -> Result<Response<String>, String> {
        info!(
            "Received http request: {} {}",
            req.method(),
            req.uri().path()
        );

        match req.uri().path() {
            "/health" => {
                if matches!(req.method(), &Method::GET | &Method::HEAD) {
                    Ok(ok_resp("OK"))
                } else {
                    Ok(err_resp(
                        StatusCode::NOT_IMPLEMENTED,
                        "Use GET or HEAD with this route",
                    ))
                }
            }
            "/" => {
                let params = query_params(req.uri().query());
                match *req.method() {
                    Method::GET => Ok(self.handle_get(&params)),
                    Method::POST => Ok(self.handle_post(&params).await),
                    _ => Ok(err_resp(
                        StatusCode::NOT_IMPLEMENTED,
                        "Use GET or POST with this route",
                    )),
                }
            }
            _ => Ok(err_resp(
                StatusCode::NOT_FOUND,
                format!("Not found '{} {}'", req.method(), req.uri().path()),
            )),
        }
    }

    /// Status and monitoring views.
    fn handle_get(&self, params: &HashMap<String, String>) -> Response<String> {
        // The monitor view is a terse probe format: "OK" when nothing is
        // blocked, otherwise a comma-joined sorted list.
        if params.get("monitor").map(String::as_str) == Some("true") {
            let mut blocked = self.store().blocked_mailboxes();
            blocked.sort();
            let body = if blocked.is_empty() {
                "OK".to_owned()
            } else {
                format!("blocked:{}", blocked.join(","))
            };
            return ok_resp(body);
        }

        match serde_json::to_string(&self.store().status()) {
            Ok(body) => ok_resp(body),
            Err(err) => err_resp(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Could not serialize status: {err}"),
            ),
        }
    }

    /// Mutations, dispatched on the `method` query parameter.
    async fn handle_post(&self, params: &HashMap<String, String>) -> Response<String> {
        let mailbox = params.get("mailbox").map(String::as_str).unwrap_or_default();

        match params.get("method").map(String::as_str) {
            Some("block") => {
                if !self.lookup().is_local(mailbox) {
                    return err_resp(StatusCode::NOT_FOUND, "unknown mailbox");
                }
                self.store().set_blocked(mailbox, true);
                info!("Admin blocked {mailbox}");
                ok_resp("OK")
            }
            Some("unblock") => {
                if !self.lookup().is_local(mailbox) {
                    return err_resp(StatusCode::NOT_FOUND, "unknown mailbox");
                }
                if self.store().set_blocked(mailbox, false) {
                    info!("Admin unblocked {mailbox}");
                    ok_resp("OK")
                } else {
                    ok_resp("not blocked")
                }
            }
            Some("save") => match self.save_state().await {
                Ok(()) => ok_resp("OK"),
                Err(err) => err_resp(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Could not save state: {err}"),
                ),
            },
            _ => err_resp(StatusCode::BAD_REQUEST, "unknown method parameter"),
        }
    }
}
