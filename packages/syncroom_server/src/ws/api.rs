use actix_web::{HttpRequest, HttpResponse, Result, get, web};

use crate::ws::{handler, server::SyncServerHandle};

#[get("/ws")]
pub async fn websocket(
    req: HttpRequest,
    stream: web::Payload,
    sync_server: web::Data<SyncServerHandle>,
) -> Result<HttpResponse, actix_web::Error> {
    let (res, session, msg_stream) = actix_ws::handle(&req, stream)?;

    // spawn websocket handler (and don't await it) so that the response is returned immediately
    actix_web::rt::spawn(async move {
        if let Err(err) =
            handler::handle_ws(sync_server.get_ref().clone(), session, msg_stream).await
        {
            log::error!("WebSocket handler failed: {err}");
        }
    });

    Ok(res)
}
