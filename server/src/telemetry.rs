//! Prometheus counters for the server (§D of the implementation spec —
//! ambient, not mandated by any particular media-plane feature). Installed
//! once at startup and scraped over a tiny `/metrics` HTTP endpoint.

use anyhow::Result;
use http_body_util::Full;
use hyper::{body::Bytes, Request, Response};
use hyper_util::rt::TokioIo;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

pub struct MetricsServer {
    handle: PrometheusHandle,
    listen: String,
}

impl MetricsServer {
    pub fn install(listen: String) -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        Ok(Self { handle, listen })
    }

    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = self.listen.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("metrics listening on http://{}/metrics", addr);

        let handle = Arc::new(self.handle);

        loop {
            let (stream, _) = listener.accept().await?;
            let handle = handle.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = hyper::service::service_fn(move |req: Request<hyper::body::Incoming>| {
                    let handle = handle.clone();
                    async move { metrics_handler(req, handle).await }
                });
                let _ = hyper::server::conn::http1::Builder::new().serve_connection(io, service).await;
            });
        }
    }
}

async fn metrics_handler(
    req: Request<hyper::body::Incoming>,
    handle: Arc<PrometheusHandle>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if req.uri().path() != "/metrics" {
        return Ok(Response::builder().status(404).body(Full::new(Bytes::from("not found"))).unwrap());
    }
    let body = handle.render();
    Ok(Response::builder()
        .status(200)
        .header("content-type", "text/plain; version=0.0.4")
        .body(Full::new(Bytes::from(body)))
        .unwrap())
}

/// Naming follows `confd_<domain>_<event>_total` (spec's implementation
/// notes §D).
pub mod names {
    pub const CONNECTIONS_ACCEPTED: &str = "confd_connections_accepted_total";
    pub const CONNECTIONS_CLOSED: &str = "confd_connections_closed_total";
    pub const CHAT_MESSAGES_ROUTED: &str = "confd_chat_messages_routed_total";
    pub const VIDEO_FRAMES_FORWARDED: &str = "confd_video_frames_forwarded_total";
    pub const VIDEO_FRAMES_DROPPED: &str = "confd_video_frames_dropped_total";
    pub const SCREEN_FRAMES_FORWARDED: &str = "confd_screen_frames_forwarded_total";
    pub const SCREEN_FRAMES_DROPPED: &str = "confd_screen_frames_dropped_total";
    pub const AUDIO_PACKETS_DROPPED: &str = "confd_audio_packets_dropped_total";
    pub const AUDIO_TICKS: &str = "confd_audio_ticks_total";
    pub const AUDIO_PUBLISHERS_PER_TICK: &str = "confd_audio_publishers_per_tick";
    pub const PRESENTER_GRANTS: &str = "confd_presenter_grants_total";
    pub const PRESENTER_DENIALS: &str = "confd_presenter_denials_total";
    pub const FILE_UPLOADS: &str = "confd_file_uploads_total";
    pub const FILE_DOWNLOADS: &str = "confd_file_downloads_total";
    pub const FILE_DELETES: &str = "confd_file_deletes_total";
    pub const FILE_BYTES_TRANSFERRED: &str = "confd_file_bytes_transferred_total";
}
