//! Server-sent event stream of viewer events.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt, stream};

use crate::{http::AppState, protocol::ServerEvent};

impl ServerEvent {
    /// Frame this event for an SSE stream.
    #[must_use]
    pub fn to_sse_event(&self) -> Event {
        Event::default()
            .event(self.name())
            .json_data(self)
            .unwrap_or_else(|e| {
                tracing::error!("Failed to serialize event: {e}");
                Event::default().event("error")
            })
    }
}

/// Stream that yields the session list first, then live events.
pub async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let relay = state.relay.clone();
    let live = relay.registry().events().stream();
    let init = ServerEvent::Init {
        sessions: relay.list_sessions().await,
    };

    let live = live.then(move |event| {
        let relay = relay.clone();
        async move { ServerEvent::from_relay(&relay, event).await }
    });

    let events = stream::once(async move { init })
        .chain(live)
        .map(|event| Ok(event.to_sse_event()));

    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{
        Router,
        body::{Body, BodyDataStream},
        http::{Request, StatusCode},
    };
    use futures::StreamExt;
    use relay_core::{Level, SessionMeta};
    use relay_session::{RendezvousCoordinator, SessionRegistry};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        time::timeout,
    };
    use tower::ServiceExt;

    use crate::{AppState, create_router};

    const TOKEN: &str = "test-token";

    fn app() -> (Router, RendezvousCoordinator) {
        let relay = RendezvousCoordinator::new(Arc::new(SessionRegistry::default()));
        let router = create_router(AppState::new(relay.clone(), TOKEN), None);
        (router, relay)
    }

    async fn open_events(router: Router) -> BodyDataStream {
        let request = Request::get("/api/events")
            .header("x-auth-token", TOKEN)
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.into_body().into_data_stream()
    }

    async fn read_until(body: &mut BodyDataStream, needle: &str) -> String {
        let mut seen = String::new();
        while !seen.contains(needle) {
            let chunk = timeout(Duration::from_secs(2), body.next())
                .await
                .expect("no frame in time")
                .expect("stream ended")
                .unwrap();
            seen.push_str(&String::from_utf8_lossy(&chunk));
        }
        seen
    }

    #[tokio::test]
    async fn test_stream_sends_init_then_live_events() {
        let (router, relay) = app();
        relay.notify("s1", "first", Level::Info).await;

        let mut body = open_events(router).await;
        let init = read_until(&mut body, "event: init").await;
        assert!(init.contains(r#""id":"s1""#));

        relay.notify("s1", "build done", Level::Success).await;
        let frame = read_until(&mut body, "build done").await;
        assert!(frame.contains("event: message"));
        assert!(frame.contains(r#""sessionId":"s1""#));
        assert!(frame.contains(r#""type":"notification""#));

        relay.register_session_meta("s2", SessionMeta::default()).await;
        let frame = read_until(&mut body, "event: sessions-changed").await;
        assert!(frame.contains(r#""id":"s2""#));
    }

    #[tokio::test]
    async fn test_stream_ends_on_shutdown() {
        let (router, relay) = app();
        let mut body = open_events(router).await;
        read_until(&mut body, "event: init").await;

        relay.registry().shutdown().await;

        let rest = timeout(Duration::from_secs(2), async {
            while let Some(chunk) = body.next().await {
                chunk.unwrap();
            }
        })
        .await;
        assert!(rest.is_ok(), "event stream stayed open after shutdown");
    }

    #[tokio::test]
    async fn test_graceful_shutdown_with_connected_viewer() {
        let (router, relay) = app();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let registry = Arc::clone(relay.registry());
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                    registry.shutdown().await;
                })
                .await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /api/events HTTP/1.1\r\nHost: {addr}\r\nx-auth-token: {TOKEN}\r\n\r\n"
        );
        client.write_all(request.as_bytes()).await.unwrap();

        let mut buf = vec![0_u8; 4096];
        let mut seen = String::new();
        while !seen.contains("event: init") {
            let n = timeout(Duration::from_secs(2), client.read(&mut buf))
                .await
                .expect("no response in time")
                .unwrap();
            assert!(n > 0, "connection closed early");
            seen.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        assert!(seen.starts_with("HTTP/1.1 200 OK"));

        stop_tx.send(()).unwrap();

        let finished = timeout(Duration::from_secs(3), server).await;
        assert!(finished.is_ok(), "server kept running after shutdown");
    }
}
