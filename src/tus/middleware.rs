// tus protocol middleware: method override and version negotiation
use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::http::Method;
use actix_web::middleware::Next;
use actix_web::{Error, ResponseError};
use log::{debug, warn};

use crate::error::TusError;
use crate::tus::{METHOD_OVERRIDE, TUS_RESUMABLE, TUS_VERSION};

fn set_resumable(headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static("tus-resumable"),
        HeaderValue::from_static(TUS_VERSION),
    );
}

/// Apply `X-HTTP-Method-Override`, then reject every request but OPTIONS
/// that does not announce exactly `Tus-Resumable: 1.0.0`.
///
/// Every response, rejections included, carries `Tus-Resumable`.
pub async fn check_protocol_version<B: MessageBody + 'static>(
    mut req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    let overridden = req
        .headers()
        .get(METHOD_OVERRIDE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Method::from_bytes(v.trim().as_bytes()).ok());
    if let Some(method) = overridden {
        debug!("Method {} overridden to {}", req.method(), method);
        req.head_mut().method = method;
    }

    if req.method() != Method::OPTIONS {
        let version = req.headers().get(TUS_RESUMABLE).and_then(|v| v.to_str().ok());
        if version != Some(TUS_VERSION) {
            warn!(
                "Rejecting {} {}: unsupported protocol version {:?}",
                req.method(),
                req.path(),
                version
            );
            let mut res = req.into_response(TusError::UnsupportedVersion.error_response());
            set_resumable(res.headers_mut());
            return Ok(res.map_into_right_body());
        }
    }

    let mut res = next.call(req).await?;
    set_resumable(res.headers_mut());
    Ok(res.map_into_left_body())
}
