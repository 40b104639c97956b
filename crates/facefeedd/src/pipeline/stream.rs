//! Streaming stage: JPEG encoding and multipart/x-mixed-replace framing.

use bytes::{Bytes, BytesMut};
use facefeed_hw::Frame;
use futures::Stream;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use thiserror::Error;
use tokio::sync::mpsc;

pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("JPEG encoder task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One multipart part: delimiter, content-type header, blank line, payload, CRLF.
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut chunk = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
    chunk.extend_from_slice(PART_HEADER);
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(PART_TRAILER);
    chunk.freeze()
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, StreamError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(image)?;
    Ok(jpeg)
}

/// Response body for one viewer.
///
/// Yields one chunk per frame from `rx` in arrival order and ends when `rx`
/// closes. Frames are encoded on the blocking pool. An encoding failure yields
/// a single error, which ends this body only. `guard` is dropped together
/// with the body.
pub fn mjpeg_body<G: Send + 'static>(
    mut rx: mpsc::Receiver<Frame>,
    quality: u8,
    guard: G,
) -> impl Stream<Item = Result<Bytes, StreamError>> + Send + 'static {
    async_stream::try_stream! {
        let _guard = guard;
        while let Some(frame) = rx.recv().await {
            let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&frame.image, quality))
                .await??;
            yield multipart_chunk(&jpeg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use image::Rgb;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Flag(Arc<AtomicBool>);

    impl Drop for Flag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn frame(seq: u64, shade: u8) -> Frame {
        Frame::new(RgbImage::from_pixel(16, 16, Rgb([shade, shade, shade])), seq)
    }

    #[test]
    fn test_multipart_chunk_is_byte_exact() {
        let chunk = multipart_chunk(b"\xff\xd8JPEG\xff\xd9");
        assert_eq!(
            &chunk[..],
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xff\xd8JPEG\xff\xd9\r\n"
        );
    }

    #[test]
    fn test_content_type_names_boundary() {
        let boundary = CONTENT_TYPE.rsplit("boundary=").next().unwrap();
        assert_eq!(boundary, "frame");
        assert!(PART_HEADER.starts_with(format!("--{boundary}\r\n").as_bytes()));
    }

    #[test]
    fn test_encode_jpeg_produces_decodable_image() {
        let jpeg = encode_jpeg(&RgbImage::from_pixel(40, 30, Rgb([0, 200, 0])), 95).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn test_encode_oversized_image_fails() {
        // Baseline JPEG dimensions are 16-bit.
        assert!(encode_jpeg(&RgbImage::new(70_000, 1), 95).is_err());
    }

    #[tokio::test]
    async fn test_body_yields_frames_in_order_then_ends() {
        let (tx, rx) = mpsc::channel(8);
        let shades = [10u8, 120, 240];
        for (seq, shade) in shades.iter().enumerate() {
            tx.send(frame(seq as u64, *shade)).await.unwrap();
        }
        drop(tx);

        let chunks: Vec<Bytes> = mjpeg_body(rx, 95, ())
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);

        for (chunk, shade) in chunks.iter().zip(shades) {
            let payload = &chunk[PART_HEADER.len()..chunk.len() - PART_TRAILER.len()];
            let decoded = image::load_from_memory(payload).unwrap().to_rgb8();
            let value = decoded.get_pixel(8, 8)[0] as i32;
            assert!((value - shade as i32).abs() <= 4, "expected ~{shade}, got {value}");
        }
    }

    #[tokio::test]
    async fn test_encoding_failure_ends_body_with_error() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(frame(0, 50)).await.unwrap();
        tx.send(Frame::new(RgbImage::new(70_000, 1), 1)).await.unwrap();
        tx.send(frame(2, 50)).await.unwrap();
        drop(tx);

        let items: Vec<_> = mjpeg_body(rx, 95, ()).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(StreamError::Encode(_))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_encoding_leaves_runtime_free() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(Frame::new(RgbImage::new(1920, 1080), 0)).await.unwrap();
        drop(tx);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        // A single-threaded runtime only reaches the spawned task if the body
        // yields while the frame is encoded.
        let items: Vec<_> = mjpeg_body(rx, 95, ()).collect().await;
        assert_eq!(items.len(), 1);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dropping_body_drops_guard() {
        let (_tx, rx) = mpsc::channel::<Frame>(1);
        let dropped = Arc::new(AtomicBool::new(false));
        let body = mjpeg_body(rx, 95, Flag(Arc::clone(&dropped)));
        drop(body);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
