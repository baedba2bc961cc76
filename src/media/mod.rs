//! Multipart image intake and resizing. Uploads are decoded and
//! re-encoded as fixed-size JPEGs on a blocking thread, then written
//! under the public image directory.

use axum::extract::Multipart;
use bytes::Bytes;
use chrono::Utc;
use image::imageops::FilterType;
use std::path::{Path, PathBuf};

use crate::api::error::ApiError;

/// Tour covers and gallery images
pub const TOUR_IMAGE_WIDTH: u32 = 2000;
pub const TOUR_IMAGE_HEIGHT: u32 = 1333;
/// Square user avatars
pub const USER_PHOTO_SIZE: u32 = 500;

const JPEG_QUALITY: u8 = 90;

/// One image field pulled out of a multipart body.
pub struct UploadedImage {
    pub field: String,
    pub data: Bytes,
}

/// Drain a multipart body, accepting only image parts.
pub async fn collect_images(multipart: &mut Multipart) -> Result<Vec<UploadedImage>, ApiError> {
    let mut images = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("Invalid multipart body").with_detail(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("image/") {
            return Err(ApiError::bad_request(
                "Not an image! Please upload only images.",
            ));
        }
        let data = field.bytes().await.map_err(|e| {
            ApiError::bad_request("Failed to read uploaded file").with_detail(e.to_string())
        })?;
        images.push(UploadedImage { field: name, data });
    }
    Ok(images)
}

pub fn tour_cover_name(tour_id: &str) -> String {
    format!("tour-{}-{}-cover.jpeg", tour_id, Utc::now().timestamp_millis())
}

pub fn tour_image_name(tour_id: &str, index: usize) -> String {
    format!(
        "tour-{}-{}-{}.jpeg",
        tour_id,
        Utc::now().timestamp_millis(),
        index + 1
    )
}

pub fn user_photo_name(user_id: &str) -> String {
    format!("user-{}-{}.jpeg", user_id, Utc::now().timestamp_millis())
}

/// Decode, crop-resize and store one upload as a JPEG. Runs the pixel
/// work on a blocking thread. Takes the destination by value so the
/// returned future owns everything it needs and can be collected and
/// awaited in a batch.
pub async fn save_resized(
    data: Bytes,
    width: u32,
    height: u32,
    dest: PathBuf,
) -> Result<(), ApiError> {
    let parent = dest.parent().map(Path::to_path_buf);

    tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        if let Some(parent) = parent {
            std::fs::create_dir_all(&parent).map_err(|e| {
                ApiError::internal("Failed to create image directory").with_detail(e.to_string())
            })?;
        }
        let decoded = image::load_from_memory(&data).map_err(|e| {
            ApiError::bad_request("Not an image! Please upload only images.")
                .with_detail(e.to_string())
        })?;
        let resized = decoded.resize_to_fill(width, height, FilterType::Triangle);

        let file = std::fs::File::create(&dest).map_err(|e| {
            ApiError::internal("Failed to store image").with_detail(e.to_string())
        })?;
        let mut writer = std::io::BufWriter::new(file);
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
        resized.write_with_encoder(encoder).map_err(|e| {
            ApiError::internal("Failed to encode image").with_detail(e.to_string())
        })?;
        Ok(())
    })
    .await
    .map_err(|e| ApiError::internal("Image task panicked").with_detail(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_carry_owner_and_suffix() {
        let cover = tour_cover_name("t1");
        assert!(cover.starts_with("tour-t1-"));
        assert!(cover.ends_with("-cover.jpeg"));

        let gallery = tour_image_name("t1", 0);
        assert!(gallery.ends_with("-1.jpeg"));

        let photo = user_photo_name("u1");
        assert!(photo.starts_with("user-u1-"));
        assert!(photo.ends_with(".jpeg"));
    }

    #[tokio::test]
    async fn garbage_bytes_are_rejected() {
        let dest = std::env::temp_dir().join("garbage-test.jpeg");
        let result = save_resized(
            Bytes::from_static(b"definitely not a jpeg"),
            100,
            100,
            dest,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn batched_saves_complete_together() {
        let buffer = image::RgbImage::from_pixel(10, 10, image::Rgb([20, 120, 20]));
        let mut encoded = Vec::new();
        image::DynamicImage::ImageRgb8(buffer)
            .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)
            .unwrap();
        let data = Bytes::from(encoded);

        let dir = std::env::temp_dir();
        let mut jobs = Vec::new();
        let mut paths = Vec::new();
        for i in 0..3 {
            let name = format!("batch-test-{}-{}.jpeg", std::process::id(), i);
            let dest = dir.join(name);
            paths.push(dest.clone());
            jobs.push(save_resized(data.clone(), 40, 40, dest));
        }
        futures::future::try_join_all(jobs).await.unwrap();

        for path in paths {
            let stored = image::open(&path).unwrap();
            assert_eq!(stored.width(), 40);
            let _ = std::fs::remove_file(&path);
        }
    }

    #[tokio::test]
    async fn valid_image_is_resized_and_stored() {
        let buffer = image::RgbImage::from_pixel(10, 10, image::Rgb([120, 20, 20]));
        let mut encoded = Vec::new();
        image::DynamicImage::ImageRgb8(buffer)
            .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)
            .unwrap();

        let dir = std::env::temp_dir();
        let name = format!("resize-test-{}.jpeg", std::process::id());
        save_resized(Bytes::from(encoded), 50, 50, dir.join(&name))
            .await
            .unwrap();

        let stored = image::open(dir.join(&name)).unwrap();
        assert_eq!(stored.width(), 50);
        assert_eq!(stored.height(), 50);
        let _ = std::fs::remove_file(dir.join(&name));
    }
}
