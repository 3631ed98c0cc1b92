// Route assembly for the tus endpoints
use std::sync::Arc;

use actix_web::middleware::from_fn;
use actix_web::web;
use log::info;

use crate::tus::handlers::{delete_file, get_file, head_file, options_handler, patch_file, post_file};
use crate::tus::middleware::check_protocol_version;
use crate::tus::UnroutedHandler;

/// Mount the tus endpoints under the handler's base path.
///
/// DELETE is only mounted if the store can terminate uploads, GET only if
/// it can read them. The decision is taken here, once.
pub fn configure(handler: Arc<UnroutedHandler>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        let capabilities = handler.capabilities();
        let scope_path = handler.config().base_path.trim_end_matches('/').to_string();

        let mut upload = web::resource("/{id}")
            .route(web::head().to(head_file))
            .route(web::patch().to(patch_file))
            .route(web::method(actix_web::http::Method::OPTIONS).to(options_handler));

        if capabilities.terminater {
            upload = upload.route(web::delete().to(delete_file));
        }
        if capabilities.reader {
            upload = upload.route(web::get().to(get_file));
        }

        info!(
            "Mounted tus endpoints at {}/ (terminate: {}, download: {})",
            scope_path, capabilities.terminater, capabilities.reader
        );

        cfg.service(
            web::scope(&scope_path)
                .app_data(web::Data::from(handler))
                .wrap(from_fn(check_protocol_version))
                .service(
                    web::resource(["", "/"])
                        .route(web::post().to(post_file))
                        .route(web::method(actix_web::http::Method::OPTIONS).to(options_handler)),
                )
                .service(upload),
        );
    }
}
