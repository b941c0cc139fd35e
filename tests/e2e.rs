//! End-to-end tests for the HLS relay
//!
//! Starts a real Axum server on a random port in front of a wiremock origin
//! and plays the part of an HLS player: fetch the master playlist, follow
//! the rewritten links, and pull keys and segments through the relay.
//!
//! `PUBLIC_URL` is left unset so rewritten links are derived from the
//! request's `Host` header, exactly as a deployment behind no proxy would.

use hls_relay::config::Config;
use hls_relay::server::build_router;
use m3u8_rs::Playlist;
use std::net::SocketAddr;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REFERER_JSON: &str = r#"{"Referer":"https://site.example/"}"#;

// ── Test server helpers ───────────────────────────────────────────────────────

async fn start_relay() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().unwrap();

    let config = Config {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        ..Config::default()
    };
    let app = build_router(config).unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Origin that only answers requests carrying the expected referer.
async fn start_origin() -> MockServer {
    let origin = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/vod/master.m3u8"))
        .and(header("referer", "https://site.example/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/vnd.apple.mpegurl")
                .set_body_string(
                    "#EXTM3U\n\
                     #EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"en\",URI=\"audio/en.m3u8\"\n\
                     #EXT-X-STREAM-INF:BANDWIDTH=1280000,AUDIO=\"aud\"\n\
                     720p/index.m3u8\n",
                ),
        )
        .mount(&origin)
        .await;

    Mock::given(method("GET"))
        .and(path("/vod/720p/index.m3u8"))
        .and(header("referer", "https://site.example/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/vnd.apple.mpegurl")
                .set_body_string(
                    "#EXTM3U\n\
                     #EXT-X-VERSION:3\n\
                     #EXT-X-TARGETDURATION:10\n\
                     #EXT-X-MEDIA-SEQUENCE:0\n\
                     #EXT-X-KEY:METHOD=AES-128,URI=\"../keys/k1.bin\",IV=0x00000000000000000000000000000001\n\
                     #EXTINF:10.0,\n\
                     seg0.ts\n\
                     #EXTINF:10.0,\n\
                     /vod/720p/seg1.ts\n\
                     #EXT-X-ENDLIST\n",
                ),
        )
        .mount(&origin)
        .await;

    Mock::given(method("GET"))
        .and(path("/vod/keys/k1.bin"))
        .and(header("referer", "https://site.example/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .set_body_bytes(vec![0xAB; 16]),
        )
        .mount(&origin)
        .await;

    Mock::given(method("GET"))
        .and(path("/vod/720p/seg0.ts"))
        .and(header("referer", "https://site.example/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp2t")
                .set_body_bytes(vec![0x47; 188 * 4]),
        )
        .mount(&origin)
        .await;

    origin
}

fn playlist_link(relay: SocketAddr, target: &str) -> String {
    format!(
        "http://{}/m3u8-proxy?url={}&headers={}",
        relay,
        urlencoding::encode(target),
        urlencoding::encode(REFERER_JSON)
    )
}

/// Decoded `url` query parameter of a relay link
fn target_of(link: &str) -> String {
    url::Url::parse(link)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_check() {
    let relay = start_relay().await;

    let resp = reqwest::get(format!("http://{}/health", relay)).await.unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "*");
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn player_walks_master_to_segment() {
    let relay = start_relay().await;
    let origin = start_origin().await;
    let client = reqwest::Client::new();

    // Master playlist
    let master_url = format!("{}/vod/master.m3u8", origin.uri());
    let resp = client
        .get(playlist_link(relay, &master_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/vnd.apple.mpegurl"
    );
    let master = resp.text().await.unwrap();

    let parsed =
        m3u8_rs::parse_playlist_res(master.as_bytes()).expect("Response should be valid M3U8");
    let Playlist::MasterPlaylist(pl) = parsed else {
        panic!("Expected a MasterPlaylist, got:\n{}", master);
    };
    assert_eq!(pl.variants.len(), 1);
    assert_eq!(pl.alternatives.len(), 1);

    let variant = &pl.variants[0].uri;
    assert!(variant.starts_with(&format!("http://{}/m3u8-proxy?url=", relay)));
    assert_eq!(
        target_of(variant),
        format!("{}/vod/720p/index.m3u8", origin.uri())
    );

    let audio = pl.alternatives[0].uri.as_ref().unwrap();
    assert_eq!(target_of(audio), format!("{}/vod/audio/en.m3u8", origin.uri()));

    // Media playlist, through the rewritten link
    let media = client.get(variant).send().await.unwrap().text().await.unwrap();
    let parsed =
        m3u8_rs::parse_playlist_res(media.as_bytes()).expect("Response should be valid M3U8");
    let Playlist::MediaPlaylist(pl) = parsed else {
        panic!("Expected a MediaPlaylist, got:\n{}", media);
    };
    assert_eq!(pl.segments.len(), 2);
    assert!(pl.end_list);

    let seg0 = &pl.segments[0].uri;
    let seg1 = &pl.segments[1].uri;
    assert!(seg0.starts_with(&format!("http://{}/ts-proxy?url=", relay)));
    assert_eq!(target_of(seg0), format!("{}/vod/720p/seg0.ts", origin.uri()));
    assert_eq!(target_of(seg1), format!("{}/vod/720p/seg1.ts", origin.uri()));

    let key = pl.segments[0].key.as_ref().expect("segment 0 should carry the key");
    let key_uri = key.uri.as_ref().unwrap();
    assert_eq!(target_of(key_uri), format!("{}/vod/keys/k1.bin", origin.uri()));
    assert!(media.contains(",IV=0x00000000000000000000000000000001"));

    // Key and segment bytes
    let key_bytes = client.get(key_uri).send().await.unwrap().bytes().await.unwrap();
    assert_eq!(&key_bytes[..], &[0xAB; 16]);

    let resp = client.get(seg0).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "video/mp2t");
    let seg_bytes = resp.bytes().await.unwrap();
    assert_eq!(seg_bytes.len(), 188 * 4);
}

#[tokio::test]
async fn forwarded_host_drives_rewritten_links() {
    let relay = start_relay().await;
    let origin = start_origin().await;

    let resp = reqwest::Client::new()
        .get(playlist_link(relay, &format!("{}/vod/master.m3u8", origin.uri())))
        .header("x-forwarded-proto", "https")
        .header("x-forwarded-host", "relay.example.com")
        .send()
        .await
        .unwrap();

    let body = resp.text().await.unwrap();
    assert!(
        body.contains("https://relay.example.com/m3u8-proxy?url="),
        "links should use the forwarded host, got:\n{}",
        body
    );
}

#[tokio::test]
async fn head_segment_reports_length_without_body() {
    let relay = start_relay().await;
    let origin = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/big.ts"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp2t")
                .insert_header("accept-ranges", "bytes"),
        )
        .expect(1)
        .mount(&origin)
        .await;

    let resp = reqwest::Client::new()
        .head(format!(
            "http://{}/ts-proxy?url={}",
            relay,
            urlencoding::encode(&format!("{}/big.ts", origin.uri()))
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("accept-ranges").unwrap(), "bytes");
}

#[tokio::test]
async fn nonexistent_host_is_502_with_cors() {
    let relay = start_relay().await;

    let resp = reqwest::get(format!(
        "http://{}/ts-proxy?url={}",
        relay,
        urlencoding::encode("http://nonexistent-host.invalid/seg.ts")
    ))
    .await
    .unwrap();

    assert_eq!(resp.status(), 502);
    assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "*");
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());
}
