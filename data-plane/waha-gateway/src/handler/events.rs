use axum::Extension;
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use futures_util::StreamExt;
use http::header;
use std::convert::Infallible;
use tracing::{debug, warn};
use waha_relay::{StreamFrame, StreamPublisher};

use super::AppState;

/// `GET /api/waha/events`: one publisher per connection; the stream (and
/// with it the bus subscription) ends when the client goes away or the
/// server shuts down.
pub async fn stream_events(
    Extension(state): Extension<AppState>,
) -> impl IntoResponse {
    if state.bridge.ensure_started() {
        debug!("upstream bridge started by first stream consumer");
    }
    let publisher = StreamPublisher::attach(
        state.bridge.bus().clone(),
        state.stream.clone(),
    );
    let stream = publisher
        .take_until(state.shutdown.clone().cancelled_owned())
        .filter_map(|frame| async move {
            to_sse_event(frame).map(Ok::<_, Infallible>)
        });
    (
        [(header::CACHE_CONTROL, "no-cache, no-transform")],
        Sse::new(stream),
    )
}

/// Events go out as `data: <json>`; keep-alives as the `: ping` comment.
fn to_sse_event(frame: StreamFrame) -> Option<Event> {
    match frame {
        StreamFrame::Event(envelope) => {
            match serde_json::to_string(envelope.as_ref()) {
                Ok(data) => Some(Event::default().data(data)),
                Err(e) => {
                    warn!(
                        error = %e,
                        id = %envelope.id,
                        "dropping unserializable envelope"
                    );
                    None
                }
            }
        }
        StreamFrame::KeepAlive => Some(Event::default().comment("ping")),
    }
}
