use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Extension, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::Stream;
use tokio::sync::broadcast::error::RecvError;

use crate::{models::Principal, AppState};

// GET /events  (SSE, only the caller's own triggered alerts; ends on shutdown)
pub async fn sse_events(
    State(state): State<AppState>,
    Extension(p): Extension<Principal>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events_tx.subscribe();
    let shutdown = state.shutdown.subscribe();
    let owner = p.owner;

    let stream = futures_util::stream::unfold(
        (rx, shutdown, owner),
        |(mut rx, mut shutdown, owner)| async move {
            loop {
                // queued events go out before the stream closes
                let recv = tokio::select! {
                    biased;
                    r = rx.recv() => r,
                    _ = shutdown.wait_for(|stop| *stop) => return None,
                };

                let evt = match recv {
                    Ok(e) if e.owner != owner => continue,
                    Ok(e) => Event::default()
                        .event("alertTriggered")
                        .json_data(&e)
                        .unwrap_or_else(|_| Event::default().event("ping").data("encode")),
                    Err(RecvError::Lagged(_)) => Event::default().event("ping").data("lagged"),
                    Err(RecvError::Closed) => return None,
                };

                return Some((Ok(evt), (rx, shutdown, owner)));
            }
        },
    );

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(20))
            .text("keep-alive"),
    )
}
