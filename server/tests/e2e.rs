//! End-to-end scenarios driven over real sockets against an in-process
//! server bound to ephemeral ports.

use std::time::Duration;

use confd::config::Config;
use confd::state::AppState;
use confd::supervisor::{self, BoundEndpoints};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

struct Addrs {
    control: std::net::SocketAddr,
    file: std::net::SocketAddr,
    screen_control: std::net::SocketAddr,
    video: std::net::SocketAddr,
    audio: std::net::SocketAddr,
    screen_data: std::net::SocketAddr,
}

async fn start_server() -> Addrs {
    let state = AppState::new(Config::for_test());
    let bound: BoundEndpoints = supervisor::bind_all(&state.config).await.unwrap();
    let addrs = Addrs {
        control: bound.control_addr(),
        file: bound.file_addr(),
        screen_control: bound.screen_control_addr(),
        video: bound.video_addr(),
        audio: bound.audio_addr(),
        screen_data: bound.screen_data_addr(),
    };
    tokio::spawn(supervisor::serve(state, bound));
    addrs
}

async fn read_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut buf = String::new();
    timeout(Duration::from_secs(2), reader.read_line(&mut buf)).await.expect("line timeout").unwrap();
    while buf.ends_with('\n') || buf.ends_with('\r') {
        buf.pop();
    }
    buf
}

/// Reads lines until one starting with `prefix` is seen, returning it.
async fn read_until(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>, prefix: &str) -> String {
    loop {
        let line = read_line(reader).await;
        if line.starts_with(prefix) {
            return line;
        }
    }
}

struct Client {
    id: u32,
    writer: tokio::net::tcp::OwnedWriteHalf,
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
}

async fn register(control_addr: std::net::SocketAddr, username: &str) -> Client {
    let stream = TcpStream::connect(control_addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    writer.write_all(format!("REGISTER:{username}\n").as_bytes()).await.unwrap();
    let id_line = read_until(&mut reader, "ID:").await;
    let id: u32 = id_line.strip_prefix("ID:").unwrap().parse().unwrap();
    read_until(&mut reader, "HISTORY_END").await;

    Client { id, writer, reader }
}

#[tokio::test]
async fn group_chat_is_echoed_to_all_participants() {
    let addrs = start_server().await;
    let mut alice = register(addrs.control, "alice").await;
    let mut bob = register(addrs.control, "bob").await;

    alice.writer.write_all(b"CHAT_MESSAGE:hello everyone\n").await.unwrap();

    let alice_line = read_until(&mut alice.reader, "CHAT:").await;
    let bob_line = read_until(&mut bob.reader, "CHAT:").await;

    assert!(alice_line.starts_with(&format!("CHAT:{}:alice:", alice.id)));
    assert!(alice_line.ends_with(":hello everyone"));
    assert_eq!(alice_line, bob_line);
}

#[tokio::test]
async fn private_chat_excludes_non_recipients() {
    let addrs = start_server().await;
    let mut alice = register(addrs.control, "alice").await;
    let mut bob = register(addrs.control, "bob").await;
    let mut carl = register(addrs.control, "carl").await;

    alice.writer.write_all(format!("PRIVATE_CHAT:{}:hello b\n", bob.id).as_bytes()).await.unwrap();

    let alice_line = read_until(&mut alice.reader, "PRIVATE:").await;
    let bob_line = read_until(&mut bob.reader, "PRIVATE:").await;
    assert_eq!(alice_line, bob_line);
    assert!(alice_line.ends_with(":hello b"));

    // carl should see no PRIVATE: line within a short window.
    carl.writer.write_all(b"CHAT_MESSAGE:ping\n").await.unwrap();
    let next = read_until(&mut carl.reader, "CHAT:").await;
    assert!(!next.starts_with("PRIVATE:"));
}

fn audio_packet(publisher_id: u32, sample: i16, chunk_samples: usize) -> Vec<u8> {
    let mut buf = publisher_id.to_be_bytes().to_vec();
    for _ in 0..chunk_samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }
    buf
}

#[tokio::test]
async fn audio_mix_three_publishers_matches_expected_values() {
    let addrs = start_server().await;
    let alice = register(addrs.control, "alice").await;
    let bob = register(addrs.control, "bob").await;
    let carl = register(addrs.control, "carl").await;

    let chunk_samples = 4;
    let alice_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let bob_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let carl_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    alice_sock.send_to(&audio_packet(alice.id, 100, chunk_samples), addrs.audio).await.unwrap();
    bob_sock.send_to(&audio_packet(bob.id, 200, chunk_samples), addrs.audio).await.unwrap();
    carl_sock.send_to(&audio_packet(carl.id, 300, chunk_samples), addrs.audio).await.unwrap();

    // Let the binds register before the mixer ticks.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut buf = [0u8; 64];
    let (n, _) = timeout(Duration::from_secs(2), alice_sock.recv_from(&mut buf)).await.unwrap().unwrap();
    let got: Vec<i16> = buf[..n].chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();
    assert_eq!(got, vec![250i16; chunk_samples]); // (200+300)/2

    let (n, _) = timeout(Duration::from_secs(2), bob_sock.recv_from(&mut buf)).await.unwrap().unwrap();
    let got: Vec<i16> = buf[..n].chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();
    assert_eq!(got, vec![200i16; chunk_samples]); // (100+300)/2

    let (n, _) = timeout(Duration::from_secs(2), carl_sock.recv_from(&mut buf)).await.unwrap().unwrap();
    let got: Vec<i16> = buf[..n].chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();
    assert_eq!(got, vec![150i16; chunk_samples]); // (100+200)/2
}

async fn hello_screen_control(addr: std::net::SocketAddr, client_id: u32) -> Client {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let reader = BufReader::new(read_half);
    writer.write_all(format!("HELLO:{client_id}\n").as_bytes()).await.unwrap();
    Client { id: client_id, writer, reader }
}

#[tokio::test]
async fn presenter_takeover_race_grants_exactly_one() {
    let addrs = start_server().await;
    let alice = register(addrs.control, "alice").await;
    let bob = register(addrs.control, "bob").await;

    let mut alice_sc = hello_screen_control(addrs.screen_control, alice.id).await;
    let mut bob_sc = hello_screen_control(addrs.screen_control, bob.id).await;

    alice_sc.writer.write_all(b"REQUEST_PRESENTER\n").await.unwrap();
    bob_sc.writer.write_all(b"REQUEST_PRESENTER\n").await.unwrap();

    let alice_reply = read_line(&mut alice_sc.reader).await;
    let bob_reply = read_line(&mut bob_sc.reader).await;

    let grants = [&alice_reply, &bob_reply].into_iter().filter(|r| *r == "PRESENTER_OK").count();
    let denials = [&alice_reply, &bob_reply].into_iter().filter(|r| *r == "PRESENTER_DENIED").count();
    assert_eq!(grants, 1);
    assert_eq!(denials, 1);
}

#[tokio::test]
async fn file_upload_catalog_download_round_trip() {
    let addrs = start_server().await;
    let mut uploader = register(addrs.control, "alice").await;
    let mut downloader = register(addrs.control, "bob").await;

    let payload = vec![0x42u8; 64 * 1024];
    let mut upload = TcpStream::connect(addrs.file).await.unwrap();
    upload
        .write_all(format!("UPLOAD:{}:alice:r.bin:{}\n", uploader.id, payload.len()).as_bytes())
        .await
        .unwrap();

    let (upload_read, mut upload_write) = upload.into_split();
    let mut upload_reader = BufReader::new(upload_read);
    let ready = read_line(&mut upload_reader).await;
    assert_eq!(ready, "READY");

    upload_write.write_all(&payload).await.unwrap();
    let success = read_line(&mut upload_reader).await;
    assert!(success.starts_with("SUCCESS:"));
    let file_id: u32 = success.strip_prefix("SUCCESS:").unwrap().parse().unwrap();

    let offer = read_until(&mut uploader.reader, "FILE_OFFER:").await;
    assert!(offer.starts_with(&format!("FILE_OFFER:{file_id}:r.bin:{}:alice:{}", payload.len(), uploader.id)));
    let offer2 = read_until(&mut downloader.reader, "FILE_OFFER:").await;
    assert_eq!(offer, offer2);

    let mut download = TcpStream::connect(addrs.file).await.unwrap();
    download.write_all(format!("DOWNLOAD:{file_id}\n").as_bytes()).await.unwrap();
    let (download_read, _download_write) = download.into_split();
    let mut download_reader = BufReader::new(download_read);
    let header = read_line(&mut download_reader).await;
    assert_eq!(header, format!("FILE:r.bin:{}", payload.len()));

    let mut received = vec![0u8; payload.len()];
    tokio::io::AsyncReadExt::read_exact(&mut download_reader, &mut received).await.unwrap();
    assert_eq!(received, payload);
}

#[tokio::test]
async fn disconnect_releases_presenter_and_notifies_remaining() {
    let addrs = start_server().await;
    let alice = register(addrs.control, "alice").await;
    let mut bob = register(addrs.control, "bob").await;

    let mut alice_sc = hello_screen_control(addrs.screen_control, alice.id).await;
    alice_sc.writer.write_all(b"REQUEST_PRESENTER\n").await.unwrap();
    let reply = read_line(&mut alice_sc.reader).await;
    assert_eq!(reply, "PRESENTER_OK");

    let presenter_line = read_until(&mut bob.reader, "PRESENTER:").await;
    assert_eq!(presenter_line, format!("PRESENTER:{}", alice.id));

    drop(alice);

    let leave_or_release = read_until(&mut bob.reader, "PRESENTER:NONE").await;
    assert_eq!(leave_or_release, "PRESENTER:NONE");
}
