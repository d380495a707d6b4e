//! The cached value: a decoded raster or a raw payload.

use bytes::Bytes;

/// Content type denoting an animated format that is cached verbatim
/// rather than decoded to a raster.
pub const CONTENT_TYPE_GIF: &str = "image/gif";

/// Content type for PNG images.
pub const CONTENT_TYPE_PNG: &str = "image/png";

/// A fetched image as held by the caches.
///
/// Exactly one variant is populated: either a decoded raster, or the
/// verbatim byte payload of a format the pipeline does not decode
/// (animated GIF). The declared content type, when the server sent one,
/// travels with the value.
#[derive(Debug, Clone)]
pub enum CachedImage {
    /// A decoded (and possibly downscaled) raster image.
    Raster {
        /// The decoded pixels.
        image: image::DynamicImage,
        /// Content type declared by the server, if any.
        content_type: Option<String>,
    },
    /// An undecoded payload, buffered verbatim.
    Raw {
        /// The payload bytes.
        bytes: Bytes,
        /// Content type declared by the server, if any.
        content_type: Option<String>,
    },
}

impl CachedImage {
    /// Wraps a decoded raster.
    #[must_use]
    pub fn raster(image: image::DynamicImage, content_type: Option<String>) -> Self {
        Self::Raster {
            image,
            content_type,
        }
    }

    /// Wraps a verbatim payload.
    #[must_use]
    pub fn raw(bytes: Bytes, content_type: Option<String>) -> Self {
        Self::Raw {
            bytes,
            content_type,
        }
    }

    /// Returns true for the raster variant.
    #[must_use]
    pub const fn is_raster(&self) -> bool {
        matches!(self, Self::Raster { .. })
    }

    /// The declared content type, if the server sent one.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        match self {
            Self::Raster { content_type, .. } | Self::Raw { content_type, .. } => {
                content_type.as_deref()
            }
        }
    }

    /// The decoded raster, if this is the raster variant.
    #[must_use]
    pub const fn as_raster(&self) -> Option<&image::DynamicImage> {
        match self {
            Self::Raster { image, .. } => Some(image),
            Self::Raw { .. } => None,
        }
    }

    /// Byte cost charged against the memory cache budget: pixel footprint
    /// for rasters, payload length for raw entries.
    #[must_use]
    pub fn cost(&self) -> usize {
        match self {
            Self::Raster { image, .. } => image.as_bytes().len(),
            Self::Raw { bytes, .. } => bytes.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_cost_is_pixel_footprint() {
        let img = image::DynamicImage::new_rgb8(10, 4);
        let cached = CachedImage::raster(img, Some(CONTENT_TYPE_PNG.into()));
        assert_eq!(cached.cost(), 10 * 4 * 3);
        assert!(cached.is_raster());
    }

    #[test]
    fn test_raw_cost_is_payload_length() {
        let cached = CachedImage::raw(Bytes::from_static(b"GIF89a...."), None);
        assert_eq!(cached.cost(), 10);
        assert!(!cached.is_raster());
        assert!(cached.as_raster().is_none());
    }

    #[test]
    fn test_content_type_passthrough() {
        let cached = CachedImage::raw(Bytes::new(), Some(CONTENT_TYPE_GIF.into()));
        assert_eq!(cached.content_type(), Some(CONTENT_TYPE_GIF));
    }
}
