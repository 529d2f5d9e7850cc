//! HTTP download tests against an in-process server

use axum::body::Body;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use seethrough_core::{Error, ImageSource};
use seethrough_detector::{HttpModelFetcher, ModelFetcher, ModelLocation, ProgressSink, SourceLoader};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const MODEL_SIZE: usize = 256 * 1024;

fn model_payload() -> Vec<u8> {
    (0..MODEL_SIZE).map(|i| (i % 251) as u8).collect()
}

fn png() -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(12, 12, Rgba([1, 2, 3, 255])))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route("/model.onnx", get(|| async { model_payload() }))
        .route(
            "/chunked.onnx",
            get(|| async {
                let chunks = model_payload()
                    .chunks(64 * 1024)
                    .map(|c| Ok::<_, std::io::Error>(Bytes::copy_from_slice(c)))
                    .collect::<Vec<_>>();
                Body::from_stream(futures::stream::iter(chunks))
            }),
        )
        .route(
            "/slow.onnx",
            get(|| async {
                // Four chunks 150ms apart: slower overall than the client
                // timeout, but never idle for that long
                let chunks = futures::stream::unfold(0usize, |sent| async move {
                    if sent == 4 {
                        return None;
                    }
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    let chunk = Bytes::from(vec![7u8; 1024]);
                    Some((Ok::<_, std::io::Error>(chunk), sent + 1))
                });
                Body::from_stream(chunks)
            }),
        )
        .route("/image.png", get(|| async { png() }))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn recording_sink() -> (ProgressSink, Arc<Mutex<Vec<f32>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink: ProgressSink = {
        let seen = seen.clone();
        Arc::new(move |p| seen.lock().push(p))
    };
    (sink, seen)
}

fn fetcher() -> HttpModelFetcher {
    HttpModelFetcher::new(Duration::from_secs(10)).unwrap()
}

#[tokio::test]
async fn test_download_reports_progress() {
    let addr = spawn_server().await;
    let (sink, seen) = recording_sink();

    let bytes = fetcher()
        .fetch(
            &ModelLocation::Url {
                url: format!("http://{}/model.onnx", addr),
            },
            Some(sink),
        )
        .await
        .unwrap();
    assert_eq!(bytes.len(), MODEL_SIZE);
    assert_eq!(bytes.as_ref(), model_payload().as_slice());

    let seen = seen.lock().clone();
    assert!(seen.len() >= 2);
    assert_eq!(seen.first(), Some(&0.0));
    assert_eq!(seen.last(), Some(&100.0));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert!(seen.iter().all(|p| (0.0..=100.0).contains(p)));
}

#[tokio::test]
async fn test_unknown_length_reports_zero_until_done() {
    let addr = spawn_server().await;
    let (sink, seen) = recording_sink();

    let bytes = fetcher()
        .fetch(
            &ModelLocation::Url {
                url: format!("http://{}/chunked.onnx", addr),
            },
            Some(sink),
        )
        .await
        .unwrap();
    assert_eq!(bytes.len(), MODEL_SIZE);

    let seen = seen.lock().clone();
    let (last, rest) = seen.split_last().unwrap();
    assert_eq!(*last, 100.0);
    assert!(rest.iter().all(|&p| p == 0.0));
}

#[tokio::test]
async fn test_slow_download_outlasting_timeout_completes() {
    let addr = spawn_server().await;
    let fetcher = HttpModelFetcher::new(Duration::from_millis(400)).unwrap();

    let bytes = fetcher
        .fetch(
            &ModelLocation::Url {
                url: format!("http://{}/slow.onnx", addr),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(bytes.len(), 4 * 1024);
}

#[tokio::test]
async fn test_http_error_is_model_load_error() {
    let addr = spawn_server().await;

    let err = fetcher()
        .fetch(
            &ModelLocation::Url {
                url: format!("http://{}/missing", addr),
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ModelLoad(_)));
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_image_source_over_http() {
    let addr = spawn_server().await;
    let loader = SourceLoader::new(Duration::from_secs(10)).unwrap();

    let bytes = loader
        .load(&ImageSource::Url(format!("http://{}/image.png", addr)))
        .await
        .unwrap();
    assert_eq!(bytes, png());

    let err = loader
        .load(&ImageSource::Url(format!("http://{}/missing", addr)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ImageLoad(_)));
}
