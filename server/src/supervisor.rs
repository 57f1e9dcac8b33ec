//! Connection supervisor (spec §4.1): binds the six endpoints, accepts
//! connections, spawns per-connection workers, and drives the datagram and
//! mixer-tick loops. A panic or error in one worker never takes down the
//! others or the process.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use control::{ClientId, Plane, SystemEvent};
use media::{RouteOutcome, ScreenRouteOutcome};
use metrics::{counter, gauge};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::telemetry::names;
use crate::state::AppState;
use crate::wire::{encode_roster, read_line, write_line};

const UDP_BUF: usize = 65_536;

fn registration_timeout(state: &AppState) -> Duration {
    Duration::from_secs(state.config.registration_timeout_secs)
}

fn broadcast_roster(state: &AppState) {
    let encoded = encode_roster(&state.registry.snapshot());
    state.chat.emit_system(&state.registry, &SystemEvent::RosterUpdate(encoded));
}

/// The six live sockets, already bound. Split out from `run` so tests can
/// bind on ephemeral (port 0) addresses and read back the addresses the OS
/// actually assigned before handing the sockets off to `serve`.
pub struct BoundEndpoints {
    pub control: TcpListener,
    pub file: TcpListener,
    pub screen_control: TcpListener,
    pub video: UdpSocket,
    pub audio: Arc<UdpSocket>,
    pub screen_data: UdpSocket,
}

impl BoundEndpoints {
    pub fn control_addr(&self) -> SocketAddr {
        self.control.local_addr().expect("bound control listener")
    }
    pub fn file_addr(&self) -> SocketAddr {
        self.file.local_addr().expect("bound file listener")
    }
    pub fn screen_control_addr(&self) -> SocketAddr {
        self.screen_control.local_addr().expect("bound screen-control listener")
    }
    pub fn video_addr(&self) -> SocketAddr {
        self.video.local_addr().expect("bound video socket")
    }
    pub fn audio_addr(&self) -> SocketAddr {
        self.audio.local_addr().expect("bound audio socket")
    }
    pub fn screen_data_addr(&self) -> SocketAddr {
        self.screen_data.local_addr().expect("bound screen-data socket")
    }
}

/// Binds all six endpoints (spec §4.1's `start(config)` contract: any
/// single bind failure unwinds the whole startup, no partially-bound
/// server is left running).
pub async fn bind_all(config: &crate::config::Config) -> Result<BoundEndpoints> {
    let control = TcpListener::bind(config.control_addr())
        .await
        .with_context(|| format!("bind control endpoint {}", config.control_addr()))?;
    let file = TcpListener::bind(config.file_addr())
        .await
        .with_context(|| format!("bind file endpoint {}", config.file_addr()))?;
    let screen_control = TcpListener::bind(config.screen_control_addr())
        .await
        .with_context(|| format!("bind screen-control endpoint {}", config.screen_control_addr()))?;
    let video = UdpSocket::bind(config.video_addr())
        .await
        .with_context(|| format!("bind video endpoint {}", config.video_addr()))?;
    let audio = Arc::new(
        UdpSocket::bind(config.audio_addr())
            .await
            .with_context(|| format!("bind audio endpoint {}", config.audio_addr()))?,
    );
    let screen_data = UdpSocket::bind(config.screen_data_addr())
        .await
        .with_context(|| format!("bind screen-data endpoint {}", config.screen_data_addr()))?;

    Ok(BoundEndpoints { control, file, screen_control, video, audio, screen_data })
}

/// Spawns every accept loop and background worker over already-bound
/// sockets. Never returns in normal operation.
pub async fn serve(state: AppState, bound: BoundEndpoints) -> Result<()> {
    info!(
        control = %bound.control_addr(),
        video = %bound.video_addr(),
        audio = %bound.audio_addr(),
        screen_control = %bound.screen_control_addr(),
        screen_data = %bound.screen_data_addr(),
        file = %bound.file_addr(),
        "all endpoints bound"
    );

    tokio::spawn(control_accept_loop(state.clone(), bound.control));
    tokio::spawn(file_accept_loop(state.clone(), bound.file));
    tokio::spawn(screen_control_accept_loop(state.clone(), bound.screen_control));
    tokio::spawn(video_loop(state.clone(), bound.video));
    tokio::spawn(audio_loop(state.clone(), bound.audio.clone()));
    tokio::spawn(screen_data_loop(state.clone(), bound.screen_data));
    tokio::spawn(audio_tick_loop(state.clone(), bound.audio));

    std::future::pending::<()>().await;
    Ok(())
}

/// Binds all six endpoints and spawns every accept loop and background
/// worker. Returns only if a bind fails; once running, the supervisor
/// itself never exits.
pub async fn run(state: AppState) -> Result<()> {
    let bound = bind_all(&state.config).await?;
    serve(state, bound).await
}

// ---------------------------------------------------------------------
// Control plane
// ---------------------------------------------------------------------

async fn control_accept_loop(state: AppState, listener: TcpListener) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("control accept failed: {e:#}");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_control_conn(state, stream, remote).await {
                debug!(%remote, "control connection ended: {:#}", e);
            }
        });
    }
}

async fn handle_control_conn(state: AppState, stream: TcpStream, remote: SocketAddr) -> Result<()> {
    counter!(names::CONNECTIONS_ACCEPTED).increment(1);
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let first = timeout(registration_timeout(&state), read_line(&mut reader))
        .await
        .ok()
        .flatten()
        .flatten();
    let Some(line) = first else {
        let _ = write_line(&mut write_half, "ERROR:registration timeout").await;
        return Ok(());
    };

    let Some(username) = line.strip_prefix("REGISTER:") else {
        let _ = write_line(&mut write_half, "ERROR:expected REGISTER").await;
        return Ok(());
    };
    if username.is_empty() || username.len() > 64 {
        let _ = write_line(&mut write_half, "ERROR:invalid username").await;
        return Ok(());
    }
    let username = username.to_string();

    let id = match state.registry.add(username.clone()) {
        Ok(id) => id,
        Err(e) => {
            let _ = write_line(&mut write_half, &format!("ERROR:{}", e.wire_reason().unwrap_or_default())).await;
            return Ok(());
        }
    };
    info!(%remote, %id, %username, "participant admitted");

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let departed = Arc::new(AtomicBool::new(false));
    let writer_state = state.clone();
    let writer_username = username.clone();
    let writer_departed = departed.clone();
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_line(&mut write_half, &line).await.is_err() {
                // A write failure means this peer is gone even if its read
                // half is still technically open (e.g. a stalled consumer);
                // run the same departure cascade the reader loop runs on EOF.
                depart(&writer_state, id, &writer_username, &writer_departed);
                break;
            }
        }
    });

    state.chat.register(id, tx.clone());
    let _ = tx.send(format!("ID:{id}"));
    broadcast_roster(&state);
    state.chat.send_history(id);
    state.chat.emit_system(&state.registry, &SystemEvent::Join { id, username: username.clone() });

    loop {
        match read_line(&mut reader).await {
            Ok(Some(line)) => {
                if !dispatch_control_line(&state, id, &line) {
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }

    depart(&state, id, &username, &departed);
    Ok(())
}

/// The full disconnect cascade from spec §3: releases the presenter floor
/// if held, drops the registry entry and its endpoint bindings, stops chat
/// fan-out, drops the stale audio bucket, and notifies the remaining
/// participants. Runs at most once per connection — the reader loop (on
/// EOF/error) and the writer task (on a failed send) can each reach here,
/// and `departed` makes the race harmless.
fn depart(state: &AppState, id: ClientId, username: &str, departed: &AtomicBool) {
    if departed.swap(true, Ordering::SeqCst) {
        return;
    }
    let was_presenter = state.presenter.vacate_if_presenter(id);
    state.registry.remove(id);
    state.chat.unregister(id);
    state.audio.remove(id);
    broadcast_roster(state);
    if was_presenter {
        state.chat.emit_system(&state.registry, &SystemEvent::PresenterChange(None));
    }
    state.chat.emit_system(&state.registry, &SystemEvent::Leave { id, username: username.to_string() });
    counter!(names::CONNECTIONS_CLOSED).increment(1);
}

/// Returns `false` when the connection should be closed (malformed line or
/// a disallowed repeat `REGISTER`).
fn dispatch_control_line(state: &AppState, id: ClientId, line: &str) -> bool {
    if let Some(body) = line.strip_prefix("CHAT_MESSAGE:") {
        state.chat.broadcast_group(&state.registry, id, body.to_string());
        counter!(names::CHAT_MESSAGES_ROUTED).increment(1);
        return true;
    }
    if let Some(rest) = line.strip_prefix("PRIVATE_CHAT:") {
        let Some((ids_part, body)) = rest.split_once(':') else {
            return false;
        };
        let recipients: Vec<ClientId> =
            ids_part.split(',').filter_map(|s| s.trim().parse::<u32>().ok()).map(ClientId).collect();
        state.chat.send_private(&state.registry, id, &recipients, body.to_string());
        counter!(names::CHAT_MESSAGES_ROUTED).increment(1);
        return true;
    }
    false
}

// ---------------------------------------------------------------------
// Screen control plane
// ---------------------------------------------------------------------

async fn screen_control_accept_loop(state: AppState, listener: TcpListener) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("screen-control accept failed: {e:#}");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_screen_control_conn(state, stream).await {
                debug!(%remote, "screen-control connection ended: {:#}", e);
            }
        });
    }
}

async fn handle_screen_control_conn(state: AppState, stream: TcpStream) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let first = timeout(registration_timeout(&state), read_line(&mut reader)).await.ok().flatten().flatten();
    let Some(line) = first else { return Ok(()) };
    let Some(raw_id) = line.strip_prefix("HELLO:") else { return Ok(()) };
    let Ok(raw_id) = raw_id.parse::<u32>() else { return Ok(()) };
    let id = ClientId(raw_id);
    if !state.registry.contains(id) {
        return Ok(());
    }

    loop {
        match read_line(&mut reader).await {
            Ok(Some(line)) if line == "REQUEST_PRESENTER" => {
                use media::RequestOutcome::*;
                match state.presenter.request(id) {
                    GrantedNew => {
                        write_line(&mut write_half, "PRESENTER_OK").await?;
                        state.chat.emit_system(&state.registry, &SystemEvent::PresenterChange(Some(id)));
                        counter!(names::PRESENTER_GRANTS).increment(1);
                    }
                    GrantedAlready => {
                        write_line(&mut write_half, "PRESENTER_OK").await?;
                    }
                    Denied => {
                        write_line(&mut write_half, "PRESENTER_DENIED").await?;
                        counter!(names::PRESENTER_DENIALS).increment(1);
                    }
                }
            }
            Ok(Some(line)) if line == "RELEASE_PRESENTER" => {
                if state.presenter.release(id) {
                    state.chat.emit_system(&state.registry, &SystemEvent::PresenterChange(None));
                }
            }
            Ok(Some(_)) => break,
            Ok(None) | Err(_) => break,
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// File transfer plane
// ---------------------------------------------------------------------

async fn file_accept_loop(state: AppState, listener: TcpListener) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("file accept failed: {e:#}");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_file_conn(state, stream).await {
                debug!(%remote, "file connection ended: {:#}", e);
            }
        });
    }
}

async fn handle_file_conn(state: AppState, mut stream: TcpStream) -> Result<()> {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);

    let Some(line) = read_line(&mut reader).await? else { return Ok(()) };
    let command = match files::parse_command(&line) {
        Ok(c) => c,
        Err(e) => {
            write_line(&mut write_half, &format!("ERROR:{}", e.0)).await?;
            return Ok(());
        }
    };

    match command {
        files::Command::Upload { client_id, username, filename, declared_size } => {
            if declared_size > state.config.max_file_size || !state.registry.contains(client_id) {
                write_line(&mut write_half, "ERROR:rejected").await?;
                return Ok(());
            }
            write_line(&mut write_half, "READY").await?;

            let mut buf = vec![0u8; declared_size as usize];
            let read_result =
                timeout(Duration::from_secs(state.config.upload_timeout_secs), reader.read_exact(&mut buf)).await;
            let complete = matches!(read_result, Ok(Ok(_)));
            if !complete {
                write_line(&mut write_half, "ERROR:Incomplete transfer").await?;
                return Ok(());
            }

            let entry = state.catalog.commit_upload(
                &state.registry,
                client_id,
                username,
                filename,
                declared_size,
                Bytes::from(buf),
            )?;
            write_line(&mut write_half, &format!("SUCCESS:{}", entry.file_id)).await?;
            state.chat.emit_system(&state.registry, &SystemEvent::FileOffer {
                file_id: entry.file_id.0,
                filename: entry.filename.clone(),
                size: entry.size,
                uploader_name: entry.uploader_name.clone(),
                uploader_id: entry.uploader_id.0,
            });
            counter!(names::FILE_UPLOADS).increment(1);
            counter!(names::FILE_BYTES_TRANSFERRED).increment(entry.size);
        }
        files::Command::Download { file_id } => {
            let Some(entry) = state.catalog.get(file_id) else {
                write_line(&mut write_half, "ERROR:File not found").await?;
                return Ok(());
            };
            write_line(&mut write_half, &format!("FILE:{}:{}", entry.filename, entry.size)).await?;
            let _ = timeout(Duration::from_millis(200), read_line(&mut reader)).await;
            timeout(Duration::from_secs(state.config.download_timeout_secs), write_half.write_all(&entry.data))
                .await
                .context("download write timed out")??;
            counter!(names::FILE_DOWNLOADS).increment(1);
            counter!(names::FILE_BYTES_TRANSFERRED).increment(entry.size);
        }
        files::Command::Delete { file_id, client_id } => match state.catalog.delete(file_id, client_id) {
            Ok(entry) => {
                write_line(&mut write_half, &format!("DELETE_SUCCESS:{file_id}")).await?;
                state.chat.emit_system(&state.registry, &SystemEvent::FileDeleted { file_id: entry.file_id.0 });
                counter!(names::FILE_DELETES).increment(1);
            }
            Err(e) => {
                write_line(&mut write_half, &format!("ERROR:{}", e.wire_reason().unwrap_or_default())).await?;
            }
        },
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Datagram planes
// ---------------------------------------------------------------------

async fn video_loop(state: AppState, socket: UdpSocket) {
    let mut buf = vec![0u8; UDP_BUF];
    loop {
        let (n, src) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("video recv failed: {e:#}");
                continue;
            }
        };
        let data = Bytes::copy_from_slice(&buf[..n]);
        match state.video.route(&state.registry, src, &data) {
            RouteOutcome::Forwarded { targets, .. } => {
                for target in targets {
                    if socket.send_to(&data, target).await.is_err() {
                        counter!(names::VIDEO_FRAMES_DROPPED).increment(1);
                    } else {
                        counter!(names::VIDEO_FRAMES_FORWARDED).increment(1);
                    }
                }
            }
            RouteOutcome::Dropped(_) => {
                counter!(names::VIDEO_FRAMES_DROPPED).increment(1);
            }
        }
    }
}

async fn screen_data_loop(state: AppState, socket: UdpSocket) {
    let mut buf = vec![0u8; UDP_BUF];
    loop {
        let (n, src) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("screen-data recv failed: {e:#}");
                continue;
            }
        };
        let data = Bytes::copy_from_slice(&buf[..n]);
        match state.screen.route(&state.registry, &state.presenter, src, &data) {
            ScreenRouteOutcome::Forwarded { targets } => {
                for target in targets {
                    if socket.send_to(&data, target).await.is_err() {
                        counter!(names::SCREEN_FRAMES_DROPPED).increment(1);
                    } else {
                        counter!(names::SCREEN_FRAMES_FORWARDED).increment(1);
                    }
                }
            }
            _ => {
                counter!(names::SCREEN_FRAMES_DROPPED).increment(1);
            }
        }
    }
}

/// Each packet is `[4-byte big-endian publisher_id][PCM: int16 LE x chunk_samples]`.
async fn audio_loop(state: AppState, socket: Arc<UdpSocket>) {
    let chunk_bytes = 4 + state.config.chunk_samples * 2;
    let mut buf = vec![0u8; UDP_BUF];
    loop {
        let (n, src) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("audio recv failed: {e:#}");
                continue;
            }
        };
        if n != chunk_bytes {
            counter!(names::AUDIO_PACKETS_DROPPED).increment(1);
            continue;
        }
        let publisher_id = ClientId(u32::from_be_bytes(buf[0..4].try_into().unwrap()));
        if !state.registry.contains(publisher_id) {
            counter!(names::AUDIO_PACKETS_DROPPED).increment(1);
            continue;
        }
        match state.registry.resolve_by_datagram(Plane::Audio, src) {
            Some(owner) if owner == publisher_id => state.registry.touch(publisher_id, Plane::Audio),
            Some(_) => {
                counter!(names::AUDIO_PACKETS_DROPPED).increment(1);
                continue;
            }
            None => {
                if !state.registry.bind_datagram(publisher_id, Plane::Audio, src) {
                    counter!(names::AUDIO_PACKETS_DROPPED).increment(1);
                    continue;
                }
            }
        }

        let samples: Vec<i16> =
            buf[4..n].chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();
        state.audio.submit(publisher_id, samples);
    }
}

async fn audio_tick_loop(state: AppState, socket: Arc<UdpSocket>) {
    let mut interval = tokio::time::interval(state.config.tick_interval());
    loop {
        interval.tick().await;
        let ticks = state.audio.tick(&state.registry);
        counter!(names::AUDIO_TICKS).increment(1);
        gauge!(names::AUDIO_PUBLISHERS_PER_TICK).set(ticks.len() as f64);

        for tick in ticks {
            let Some(addr) = state.registry.endpoint(tick.recipient, Plane::Audio) else { continue };
            let mut payload = Vec::with_capacity(tick.samples.len() * 2);
            for sample in tick.samples {
                payload.extend_from_slice(&sample.to_le_bytes());
            }
            let _ = socket.send_to(&payload, addr).await;
        }
    }
}
