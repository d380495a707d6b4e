//! Decode and resize stage.
//!
//! Turns fetched bytes into a [`CachedImage`] and translates cache
//! entries back. Animated payloads skip decoding entirely; rasters are
//! decoded off the async context and downscaled to the request's bounds.

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::domain::entities::{CONTENT_TYPE_GIF, CONTENT_TYPE_PNG, CachedImage};
use crate::domain::ports::{CacheError, CacheResult, FetchedPayload};
use crate::infrastructure::cache::{EntryKind, Snapshot};

/// Decodes a fetched payload, applying the resize policy.
///
/// A GIF content type short-circuits to a verbatim raw entry with no
/// decode and no resize. Anything else is decoded as a raster on a
/// blocking worker;
/// corrupt data, decoder resource exhaustion, and decode-task panics all
/// surface as [`CacheError::Decode`].
///
/// # Errors
/// Returns [`CacheError::Decode`] when the payload cannot be decoded.
pub async fn decode_payload(
    payload: FetchedPayload,
    max_width: u32,
    max_height: u32,
) -> CacheResult<CachedImage> {
    if is_passthrough(payload.content_type.as_deref()) {
        debug!(size = payload.bytes.len(), "Caching animated payload verbatim");
        return Ok(CachedImage::raw(payload.bytes, payload.content_type));
    }

    let FetchedPayload {
        bytes,
        content_type,
    } = payload;

    let decoded = tokio::task::spawn_blocking(move || -> CacheResult<image::DynamicImage> {
        let img = image::load_from_memory(&bytes)
            .map_err(|e| CacheError::Decode(format!("failed to decode image: {e}")))?;
        Ok(downscale(img, max_width, max_height))
    })
    .await
    .map_err(|e| CacheError::Decode(format!("decode task panicked: {e}")))??;

    Ok(CachedImage::raster(decoded, content_type))
}

/// Rebuilds a cached image from a disk snapshot.
///
/// Raster entries decode on a blocking worker; any failure reports a miss
/// so the pipeline falls through to network.
pub async fn from_snapshot(snapshot: Snapshot) -> Option<CachedImage> {
    match snapshot.kind() {
        EntryKind::Raw => Some(CachedImage::raw(
            Bytes::from(snapshot.into_payload()),
            Some(CONTENT_TYPE_GIF.to_owned()),
        )),
        EntryKind::Raster => {
            let payload = snapshot.into_payload();
            match tokio::task::spawn_blocking(move || image::load_from_memory(&payload)).await {
                Ok(Ok(img)) => Some(CachedImage::raster(img, Some(CONTENT_TYPE_PNG.to_owned()))),
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to decode disk entry");
                    None
                }
                Err(e) => {
                    error!(error = %e, "Decode task panicked");
                    None
                }
            }
        }
    }
}

/// The marker and payload slots persisted for a cached image.
///
/// Rasters are re-encoded as PNG whatever their source format, so a disk
/// round trip stays pixel-identical; raw payloads persist verbatim.
///
/// # Errors
/// Returns [`CacheError::Io`] when PNG encoding fails.
pub fn disk_slots(image: &CachedImage) -> CacheResult<(EntryKind, Vec<u8>)> {
    match image {
        CachedImage::Raster { image, .. } => Ok((EntryKind::Raster, encode_raster(image)?)),
        CachedImage::Raw { bytes, .. } => Ok((EntryKind::Raw, bytes.to_vec())),
    }
}

fn encode_raster(image: &image::DynamicImage) -> CacheResult<Vec<u8>> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| CacheError::Io(format!("failed to encode raster for disk: {e}")))?;
    Ok(buf.into_inner())
}

fn is_passthrough(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|media| media.trim() == CONTENT_TYPE_GIF)
}

fn downscale(img: image::DynamicImage, max_width: u32, max_height: u32) -> image::DynamicImage {
    let Some((width, height)) =
        scaled_dimensions(img.width(), img.height(), max_width, max_height)
    else {
        return img;
    };
    img.resize_exact(width, height, image::imageops::FilterType::Lanczos3)
}

/// Target dimensions for an image exceeding its bounds, or `None` when no
/// resize applies (either bound zero, or already within bounds).
///
/// The larger axis binds (width when `width > height`, height otherwise)
/// and is clamped to its maximum; the other axis scales proportionally.
fn scaled_dimensions(
    width: u32,
    height: u32,
    max_width: u32,
    max_height: u32,
) -> Option<(u32, u32)> {
    if max_width == 0 || max_height == 0 {
        return None;
    }
    if width <= max_width && height <= max_height {
        return None;
    }

    let (new_width, new_height) = if width > height {
        let w = width.min(max_width);
        (w, scale_axis(height, w, width))
    } else {
        let h = height.min(max_height);
        (scale_axis(width, h, height), h)
    };

    Some((new_width.max(1), new_height.max(1)))
}

#[allow(clippy::cast_possible_truncation)]
fn scale_axis(axis: u32, clamped: u32, original: u32) -> u32 {
    (u64::from(axis) * u64::from(clamped) / u64::from(original)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    use crate::domain::entities::CacheKey;
    use crate::infrastructure::cache::DiskStore;

    fn checkered(width: u32, height: u32) -> image::DynamicImage {
        image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([200, 30, 60])
            } else {
                image::Rgb([10, 120, 240])
            }
        }))
    }

    fn png_payload(img: &image::DynamicImage) -> FetchedPayload {
        let (_, bytes) = disk_slots(&CachedImage::raster(img.clone(), None)).unwrap();
        FetchedPayload {
            bytes: Bytes::from(bytes),
            content_type: Some(CONTENT_TYPE_PNG.to_owned()),
        }
    }

    #[test_case(1000, 500, 300, 300 => Some((300, 150)); "wide image binds on width")]
    #[test_case(500, 1000, 300, 300 => Some((150, 300)); "tall image binds on height")]
    #[test_case(200, 100, 300, 300 => None; "within bounds passes through")]
    #[test_case(1000, 500, 0, 0 => None; "zero bounds mean unconstrained")]
    #[test_case(1000, 500, 300, 0 => None; "one zero bound means unconstrained")]
    fn test_scaled_dimensions(w: u32, h: u32, max_w: u32, max_h: u32) -> Option<(u32, u32)> {
        scaled_dimensions(w, h, max_w, max_h)
    }

    #[tokio::test]
    async fn test_gif_payload_buffers_verbatim() {
        let payload = FetchedPayload {
            bytes: Bytes::from_static(b"GIF89a not really a gif"),
            content_type: Some(CONTENT_TYPE_GIF.to_owned()),
        };

        let cached = decode_payload(payload, 300, 300).await.unwrap();
        match cached {
            CachedImage::Raw { bytes, .. } => {
                assert_eq!(&bytes[..], b"GIF89a not really a gif");
            }
            CachedImage::Raster { .. } => panic!("gif should not be decoded"),
        }
    }

    #[tokio::test]
    async fn test_decode_without_constraint_keeps_dimensions() {
        let cached = decode_payload(png_payload(&checkered(64, 48)), 0, 0).await.unwrap();
        let raster = cached.as_raster().unwrap();
        assert_eq!((raster.width(), raster.height()), (64, 48));
    }

    #[tokio::test]
    async fn test_decode_downscales_oversized_image() {
        let cached = decode_payload(png_payload(&checkered(1000, 500)), 300, 300)
            .await
            .unwrap();
        let raster = cached.as_raster().unwrap();
        assert_eq!((raster.width(), raster.height()), (300, 150));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_decode_error() {
        let payload = FetchedPayload {
            bytes: Bytes::from_static(b"\x89PNG but then garbage"),
            content_type: Some(CONTENT_TYPE_PNG.to_owned()),
        };

        let err = decode_payload(payload, 0, 0).await.unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
    }

    #[tokio::test]
    async fn test_disk_round_trip_is_pixel_identical() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = DiskStore::open(temp.path().to_path_buf(), 1, 1024 * 1024)
            .await
            .unwrap();
        let key = CacheKey::derive("https://example.com/a.png", 0, 0);

        let original = checkered(32, 16);
        let cached = CachedImage::raster(original.clone(), Some(CONTENT_TYPE_PNG.to_owned()));
        let (kind, payload) = disk_slots(&cached).unwrap();
        let mut editor = store.edit(&key).unwrap();
        editor.set_marker(kind);
        editor.set_payload(payload);
        editor.commit().await.unwrap();

        let snapshot = store.lookup(&key).await.unwrap();
        assert_eq!(snapshot.kind(), EntryKind::Raster);
        let restored = from_snapshot(snapshot).await.unwrap();
        assert!(restored.is_raster());
        assert_eq!(
            restored.as_raster().unwrap().to_rgb8().as_raw(),
            original.to_rgb8().as_raw()
        );
    }

    #[tokio::test]
    async fn test_raw_round_trip_preserves_marker_and_bytes() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = DiskStore::open(temp.path().to_path_buf(), 1, 1024 * 1024)
            .await
            .unwrap();
        let key = CacheKey::derive("https://example.com/a.gif", 0, 0);

        let cached = CachedImage::raw(
            Bytes::from_static(b"GIF89a animated"),
            Some(CONTENT_TYPE_GIF.to_owned()),
        );
        let (kind, payload) = disk_slots(&cached).unwrap();
        assert_eq!(kind, EntryKind::Raw);
        let mut editor = store.edit(&key).unwrap();
        editor.set_marker(kind);
        editor.set_payload(payload);
        editor.commit().await.unwrap();

        let restored = from_snapshot(store.lookup(&key).await.unwrap()).await.unwrap();
        match restored {
            CachedImage::Raw { bytes, .. } => assert_eq!(&bytes[..], b"GIF89a animated"),
            CachedImage::Raster { .. } => panic!("marker lost on round trip"),
        }
    }
}
