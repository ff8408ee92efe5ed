//! Provide Object Detection
//!
//! Frames are classified by a remote detection service. This module holds the
//! detection records, the response parser and the HTTP client talking to the service.

use base64::{engine::general_purpose, Engine as _};
use futures::future::BoxFuture;
use serde::Deserialize;

use super::sampler::EncodedImage;
use crate::module::state::PipelineError;

pub mod http {
    //! HTTP client for the `/detect` endpoint.
    //!
    use std::time::Duration;

    use futures::FutureExt;
    use reqwest::multipart::{Form, Part};

    use super::{parse_response, DetectError, DetectionBatch, DetectionService};
    use crate::module::{
        define, state::PipelineError, util::conf, vision::sampler::EncodedImage,
    };

    /// Talks to one detection endpoint.
    ///
    #[derive(Debug, Clone)]
    pub struct DetectionClient {
        client: reqwest::Client,
        endpoint: String,
        timeout: Duration,
    }

    /// Methods for DetectionClient.
    ///
    impl DetectionClient {
        /// DetectionClient's constructor.
        ///
        /// # Arguments
        ///
        /// * `conf` - The `[detector]` section; the endpoint is `base_url` + `/detect`.
        ///
        pub fn new(conf: &conf::Detector) -> Self {
            Self {
                client: reqwest::Client::new(),
                endpoint: endpoint_url(&conf.base_url),
                timeout: Duration::from_millis(conf.timeout_ms),
            }
        }

        /// The full url requests are posted to.
        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }

        /// Post one frame and parse the answer.
        ///
        /// Keeps the detailed failure so callers can log it before coarsening.
        pub async fn request(&self, frame: EncodedImage) -> Result<DetectionBatch, DetectError> {
            log::debug!(
                "Posting {}x{} frame ({} bytes) to {}",
                frame.width,
                frame.height,
                frame.bytes.len(),
                self.endpoint
            );
            let part = Part::bytes(frame.bytes)
                .file_name(frame.encoding.file_name())
                .mime_str(frame.encoding.mime())?;
            let form = Form::new().part(define::endpoint::FILE_FIELD, part);

            let res = self
                .client
                .post(&self.endpoint)
                .timeout(self.timeout)
                .multipart(form)
                .send()
                .await?;

            let status = res.status();
            if !status.is_success() {
                return Err(DetectError::Status(status));
            }
            let body = res.bytes().await?;
            parse_response(&body)
        }
    }

    impl DetectionService for DetectionClient {
        fn submit(
            &self,
            frame: EncodedImage,
        ) -> futures::future::BoxFuture<'static, Result<DetectionBatch, PipelineError>> {
            let client = self.clone();
            async move {
                client.request(frame).await.map_err(|e| {
                    log::error!("Detection request to {} failed: {}", client.endpoint, e);
                    PipelineError::ServiceUnreachable
                })
            }
            .boxed()
        }
    }

    /// Join the base url and the detect route without doubling the slash.
    pub fn endpoint_url(base_url: &str) -> String {
        format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            define::endpoint::DETECT_ROUTE
        )
    }
}

/// Sends one encoded frame to a detector and yields its batch.
///
/// Implementations map every failure to the coarse `ServiceUnreachable`
/// after logging it.
pub trait DetectionService: Send + Sync + 'static {
    fn submit(
        &self,
        frame: EncodedImage,
    ) -> BoxFuture<'static, Result<DetectionBatch, PipelineError>>;
}

/// Why a request failed, before it is coarsened for the store.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("service answered {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Detection result
///
/// Box corners are in source-frame pixels with `x1 <= x2` and `y1 <= y2`.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub cropped_img: Option<Vec<u8>>,
}

/// Detections returned by one inference call, in service order.
pub type DetectionBatch = Vec<Detection>;

/// Detection's methods
///
impl Detection {
    /// Build a detection, rejecting records that break the box or confidence rules.
    pub fn new(
        label: &str,
        confidence: f32,
        bbox: [f32; 4],
        cropped_img: Option<Vec<u8>>,
    ) -> Result<Self, DetectError> {
        let [x1, y1, x2, y2] = bbox;
        if label.is_empty() {
            return Err(DetectError::Malformed("empty label".to_string()));
        }
        if !(0.0..=100.0).contains(&confidence) {
            return Err(DetectError::Malformed(format!(
                "confidence {} out of range",
                confidence
            )));
        }
        if bbox.iter().any(|v| !v.is_finite()) || x1 > x2 || y1 > y2 {
            return Err(DetectError::Malformed(format!("bad box {:?}", bbox)));
        }
        Ok(Self {
            label: label.to_string(),
            confidence,
            x1,
            y1,
            x2,
            y2,
            cropped_img,
        })
    }

    /// Overlay caption, e.g. `person 87.3%`.
    pub fn caption(&self) -> String {
        format!("{} {:.1}%", self.label, self.confidence)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    label: String,
    confidence: f32,
    #[serde(rename = "box")]
    bbox: [f32; 4],
    #[serde(default)]
    cropped_img: Option<String>,
}

/// Parse a `/detect` response body into a batch.
///
/// A record that breaks the detection rules fails the whole body.
pub fn parse_response(body: &[u8]) -> Result<DetectionBatch, DetectError> {
    let res: DetectResponse =
        serde_json::from_slice(body).map_err(|e| DetectError::Malformed(e.to_string()))?;
    res.detections
        .into_iter()
        .map(|det| {
            let crop = det.cropped_img.and_then(|b64| {
                match general_purpose::STANDARD.decode(b64.as_bytes()) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        log::warn!("Dropping undecodable crop for {}: {}", det.label, e);
                        None
                    }
                }
            });
            Detection::new(&det.label, det.confidence, det.bbox, crop)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::http::{endpoint_url, DetectionClient};
    use super::*;
    use crate::module::util::conf;
    use crate::module::vision::sampler::Encoding;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn detector_conf(base_url: String) -> conf::Detector {
        conf::Detector {
            base_url,
            timeout_ms: 2000,
            overlap: "discard_stale".to_string(),
        }
    }

    fn frame() -> EncodedImage {
        EncodedImage {
            bytes: vec![0xff, 0xd8, 0xff, 0xd9],
            encoding: Encoding::Jpeg(None),
            width: 2,
            height: 2,
        }
    }

    /// Whether `raw` holds a full request, sized or chunked.
    fn request_complete(raw: &[u8]) -> bool {
        let Some(end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&raw[..end]).to_ascii_lowercase();
        let body = &raw[end + 4..];
        match head.lines().find_map(|l| l.strip_prefix("content-length:")) {
            Some(len) => body.len() >= len.trim().parse::<usize>().unwrap_or(0),
            None => body.ends_with(b"0\r\n\r\n"),
        }
    }

    /// Serve exactly one request with a canned response, handing back what was received.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                if request_complete(&received) {
                    break;
                }
            }
            let res = format!(
                "{}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            sock.write_all(res.as_bytes()).await.unwrap();
            sock.shutdown().await.unwrap();
            received
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn parse_single_person() {
        let body = br#"{"detections":[{"label":"person","confidence":87.3,"box":[10,20,110,220]}]}"#;
        let batch = parse_response(body).unwrap();
        assert_eq!(batch.len(), 1);
        let det = &batch[0];
        assert_eq!(det.label, "person");
        assert_eq!((det.x1, det.y1, det.x2, det.y2), (10.0, 20.0, 110.0, 220.0));
        assert_eq!(det.cropped_img, None);
        assert_eq!(det.caption(), "person 87.3%");
    }

    #[test]
    fn parse_keeps_service_order_and_crops() {
        let body = br#"{"detections":[
            {"label":"dog","confidence":40,"box":[0,0,5,5],"cropped_img":"aGVsbG8="},
            {"label":"cat","confidence":99.99,"box":[1,1,1,1],"cropped_img":"%%%"}
        ]}"#;
        let batch = parse_response(body).unwrap();
        assert_eq!(batch[0].label, "dog");
        assert_eq!(batch[0].cropped_img.as_deref(), Some(&b"hello"[..]));
        // undecodable crop is dropped, the record survives
        assert_eq!(batch[1].label, "cat");
        assert_eq!(batch[1].cropped_img, None);
        assert_eq!(batch[1].width(), 0.0);
    }

    #[test]
    fn parse_empty_batch() {
        assert!(parse_response(br#"{"detections":[]}"#).unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_malformed_bodies() {
        let bodies: [&[u8]; 6] = [
            b"not json",
            br#"{"objects":[]}"#,
            br#"{"detections":[{"label":"","confidence":1,"box":[0,0,1,1]}]}"#,
            br#"{"detections":[{"label":"a","confidence":101,"box":[0,0,1,1]}]}"#,
            br#"{"detections":[{"label":"a","confidence":1,"box":[5,0,1,1]}]}"#,
            br#"{"detections":[{"label":"a","confidence":1,"box":[0,0,1]}]}"#,
        ];
        for body in bodies {
            assert!(
                matches!(parse_response(body), Err(DetectError::Malformed(_))),
                "accepted {:?}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn endpoint_joins_route() {
        assert_eq!(endpoint_url("http://localhost:8000"), "http://localhost:8000/detect");
        assert_eq!(endpoint_url("http://localhost:8000/"), "http://localhost:8000/detect");
    }

    #[tokio::test]
    async fn submit_posts_multipart_frame() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"detections":[{"label":"person","confidence":87.3,"box":[10,20,110,220]}]}"#,
        )
        .await;
        let client = DetectionClient::new(&detector_conf(url));
        let batch = client.submit(frame()).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].caption(), "person 87.3%");

        let received = String::from_utf8_lossy(&server.await.unwrap()).into_owned();
        assert!(received.starts_with("POST /detect HTTP/1.1"));
        assert!(received.contains("name=\"file\""));
        assert!(received.contains("filename=\"frame.jpg\""));
        assert!(received.contains("image/jpeg"));
    }

    #[tokio::test]
    async fn submit_maps_http_error_to_service_unreachable() {
        let (url, server) = serve_once("HTTP/1.1 500 Internal Server Error", "{}").await;
        let client = DetectionClient::new(&detector_conf(url.clone()));
        let res = client.request(frame()).await;
        assert!(matches!(res, Err(DetectError::Status(s)) if s.as_u16() == 500));
        server.await.unwrap();

        let (url, _server) = serve_once("HTTP/1.1 503 Service Unavailable", "{}").await;
        let client = DetectionClient::new(&detector_conf(url));
        assert_eq!(
            client.submit(frame()).await,
            Err(PipelineError::ServiceUnreachable)
        );
    }

    #[tokio::test]
    async fn submit_maps_refused_connection_to_service_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = DetectionClient::new(&detector_conf(format!("http://{}", addr)));
        assert_eq!(
            client.submit(frame()).await,
            Err(PipelineError::ServiceUnreachable)
        );
    }

    #[tokio::test]
    async fn submit_maps_garbage_body_to_service_unreachable() {
        let (url, _server) = serve_once("HTTP/1.1 200 OK", "<html></html>").await;
        let client = DetectionClient::new(&detector_conf(url));
        assert_eq!(
            client.submit(frame()).await,
            Err(PipelineError::ServiceUnreachable)
        );
    }
}
