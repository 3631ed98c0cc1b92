// tus protocol request handlers
use actix_web::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use actix_web::{web, HttpRequest, HttpResponse};
use bytes::BytesMut;
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::io::Read;

use crate::error::{TusError, TusResult};
use crate::storage::FileInfo;
use crate::tus::metadata::{parse_concat, parse_metadata, serialize_metadata, ConcatRequest};
use crate::tus::{
    UnroutedHandler, OFFSET_OCTET_STREAM, TUS_EXTENSION, TUS_MAX_SIZE, TUS_VERSION,
    TUS_VERSION_HEADER, UPLOAD_CONCAT, UPLOAD_LENGTH, UPLOAD_METADATA, UPLOAD_OFFSET,
};

const MDC_UPLOAD_ID: &str = "upload_id";

/// Tags log lines with the upload id until dropped
struct UploadMdc;

impl UploadMdc {
    fn insert(id: &str) -> Self {
        log_mdc::insert(MDC_UPLOAD_ID, id);
        UploadMdc
    }
}

impl Drop for UploadMdc {
    fn drop(&mut self) {
        log_mdc::remove(MDC_UPLOAD_ID);
    }
}

fn header_str<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn parse_u64_header(req: &HttpRequest, name: &str, err: TusError) -> TusResult<u64> {
    header_str(req, name)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or(err)
}

/// Discovery: which version, extensions and sizes this server supports
/// Handles requests like: OPTIONS /files/
pub async fn options_handler(handler: web::Data<UnroutedHandler>) -> HttpResponse {
    let mut res = HttpResponse::NoContent();
    res.insert_header((TUS_EXTENSION, handler.extensions()))
        .insert_header((TUS_VERSION_HEADER, TUS_VERSION));

    let max_size = handler.config().max_size;
    if max_size > 0 {
        res.insert_header((TUS_MAX_SIZE, max_size.to_string()));
    }
    res.finish()
}

/// Create a new upload
/// Handles requests like: POST /files/
pub async fn post_file(
    req: HttpRequest,
    handler: web::Data<UnroutedHandler>,
) -> Result<HttpResponse, TusError> {
    let concat = header_str(&req, UPLOAD_CONCAT).map(parse_concat).transpose()?;

    let mut partial_uploads = Vec::new();
    let size = match &concat {
        Some(ConcatRequest::Final(ids)) => {
            if !handler.capabilities().concater {
                return Err(TusError::NotImplemented);
            }
            partial_uploads = ids.clone();
            size_of_final_upload(&handler, ids)?
        }
        _ => parse_u64_header(&req, UPLOAD_LENGTH, TusError::InvalidUploadLength)?,
    };

    let max_size = handler.config().max_size;
    if max_size > 0 && size > max_size {
        warn!("Rejecting upload of {} bytes, limit is {}", size, max_size);
        return Err(TusError::MaxSizeExceeded);
    }

    let metadata = header_str(&req, UPLOAD_METADATA)
        .map(parse_metadata)
        .unwrap_or_default();

    let mut info = FileInfo::new(size).with_metadata(metadata);
    info.is_partial = concat == Some(ConcatRequest::Partial);
    info.is_final = !partial_uploads.is_empty();
    info.partial_uploads = partial_uploads.clone();

    let store = handler.store();
    let id = store.new_upload(info.clone())?;
    let _mdc = UploadMdc::insert(&id);

    if partial_uploads.is_empty() {
        info!("Created upload {} with length {}", id, size);
    } else {
        if let Err(e) = concat_final_upload(&handler, &id, &partial_uploads) {
            discard_upload(&handler, &id);
            return Err(e);
        }
        info!("Created final upload {} from {} partial uploads", id, partial_uploads.len());
        handler.notify_complete(FileInfo {
            id: id.clone(),
            offset: size,
            ..info
        });
    }

    Ok(HttpResponse::Created()
        .insert_header((LOCATION, handler.upload_url(&req, &id)))
        .finish())
}

/// A final upload is complete as soon as its partials are concatenated
fn concat_final_upload(handler: &UnroutedHandler, id: &str, partial_uploads: &[String]) -> TusResult<()> {
    let store = handler.store();
    let concater = store.as_concater().ok_or(TusError::NotImplemented)?;
    concater.concat_uploads(id, partial_uploads)?;
    if let Some(finisher) = store.as_finisher() {
        finisher.finish_upload(id)?;
    }
    Ok(())
}

/// Drop an upload the client never got to see, e.g. a final upload whose
/// concatenation failed. Stores that cannot terminate keep it.
fn discard_upload(handler: &UnroutedHandler, id: &str) {
    match handler.store().as_terminater() {
        Some(terminater) => {
            if let Err(e) = terminater.terminate(id) {
                error!("Failed to discard upload {}: {}", id, e);
            } else {
                warn!("Discarded upload {} after failed concatenation", id);
            }
        }
        None => warn!("Upload {} is left behind, store cannot terminate it", id),
    }
}

/// Every partial upload must exist, be partial and be complete
fn size_of_final_upload(handler: &UnroutedHandler, ids: &[String]) -> TusResult<u64> {
    let mut size = 0u64;
    for id in ids {
        let info = handler.store().get_info(id)?;
        if !info.is_partial {
            return Err(TusError::InvalidConcat);
        }
        if !info.is_complete() {
            return Err(TusError::UploadNotFinished);
        }
        size += info.size;
    }
    Ok(size)
}

/// Report the state of an upload
/// Handles requests like: HEAD /files/{id}
pub async fn head_file(
    path: web::Path<String>,
    req: HttpRequest,
    handler: web::Data<UnroutedHandler>,
) -> Result<HttpResponse, TusError> {
    let id = path.into_inner();
    let _mdc = UploadMdc::insert(&id);

    let _lock = handler.lock_upload(&id)?;
    let info = handler.store().get_info(&id)?;

    let mut res = HttpResponse::Ok();
    res.insert_header((UPLOAD_OFFSET, info.offset.to_string()))
        .insert_header((UPLOAD_LENGTH, info.size.to_string()))
        .insert_header((CACHE_CONTROL, "no-store"));

    if !info.metadata.is_empty() {
        res.insert_header((UPLOAD_METADATA, serialize_metadata(&info.metadata)));
    }
    if info.is_partial {
        res.insert_header((UPLOAD_CONCAT, "partial"));
    } else if info.is_final {
        let urls: Vec<String> = info
            .partial_uploads
            .iter()
            .map(|partial| handler.upload_url(&req, partial))
            .collect();
        res.insert_header((UPLOAD_CONCAT, format!("final;{}", urls.join(" "))));
    }

    Ok(res.finish())
}

/// Append bytes to an upload
/// Handles requests like: PATCH /files/{id}
pub async fn patch_file(
    path: web::Path<String>,
    req: HttpRequest,
    mut payload: web::Payload,
    handler: web::Data<UnroutedHandler>,
) -> Result<HttpResponse, TusError> {
    let id = path.into_inner();
    let _mdc = UploadMdc::insert(&id);

    if header_str(&req, CONTENT_TYPE.as_str()) != Some(OFFSET_OCTET_STREAM) {
        return Err(TusError::InvalidContentType);
    }

    let _lock = handler.lock_upload(&id)?;
    let store = handler.store();
    let info = store.get_info(&id)?;

    if info.is_final {
        return Err(TusError::ModifyFinal);
    }

    let offset = parse_u64_header(&req, UPLOAD_OFFSET, TusError::InvalidOffset)?;
    if offset != info.offset {
        warn!("Upload {} is at offset {}, client sent {}", id, info.offset, offset);
        return Err(TusError::MismatchOffset);
    }

    let remaining = info.size - info.offset;
    if let Some(length) = header_str(&req, CONTENT_LENGTH.as_str()).and_then(|v| v.parse::<u64>().ok()) {
        if length > remaining {
            return Err(TusError::SizeExceeded);
        }
    }

    // Nothing left to write, do not bother the data store.
    if remaining == 0 {
        return Ok(HttpResponse::NoContent()
            .insert_header((UPLOAD_OFFSET, offset.to_string()))
            .finish());
    }

    let mut bytes = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk?;
        if (bytes.len() + chunk.len()) as u64 > remaining {
            return Err(TusError::SizeExceeded);
        }
        bytes.extend_from_slice(&chunk);
    }

    let written = store.write_chunk(&id, offset, &bytes)?;
    let new_offset = offset + written;
    debug!("Upload {} received {} bytes, now at {}/{}", id, written, new_offset, info.size);

    if new_offset == info.size {
        if let Some(finisher) = store.as_finisher() {
            finisher.finish_upload(&id)?;
        }
        info!("Upload {} finished ({} bytes)", id, info.size);
        handler.notify_complete(FileInfo {
            offset: new_offset,
            ..info
        });
    }

    Ok(HttpResponse::NoContent()
        .insert_header((UPLOAD_OFFSET, new_offset.to_string()))
        .finish())
}

/// Download the bytes received so far; only mounted for stores that can read
/// Handles requests like: GET /files/{id}
pub async fn get_file(
    path: web::Path<String>,
    handler: web::Data<UnroutedHandler>,
) -> Result<HttpResponse, TusError> {
    let id = path.into_inner();
    let _mdc = UploadMdc::insert(&id);

    let store = handler.store();
    let reader = store.as_reader().ok_or(TusError::NotImplemented)?;

    let _lock = handler.lock_upload(&id)?;
    let info = store.get_info(&id)?;

    if info.offset == 0 {
        return Ok(HttpResponse::NoContent().finish());
    }

    let mut data = Vec::with_capacity(info.offset as usize);
    reader.get_reader(&id)?.take(info.offset).read_to_end(&mut data)?;

    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .body(data))
}

/// Terminate an upload; only mounted for stores that can terminate
/// Handles requests like: DELETE /files/{id}
pub async fn delete_file(
    path: web::Path<String>,
    handler: web::Data<UnroutedHandler>,
) -> Result<HttpResponse, TusError> {
    let id = path.into_inner();
    let _mdc = UploadMdc::insert(&id);

    let terminater = handler.store().as_terminater().ok_or(TusError::NotImplemented)?;

    let _lock = handler.lock_upload(&id)?;
    terminater.terminate(&id)?;
    info!("Terminated upload {} on client request", id);

    Ok(HttpResponse::NoContent().finish())
}
