//! Conversion of stored fragments
//!
//! Fragments are created through the entity, stored, read back and run
//! through the conversion engine the way the HTTP layer does it.

use bytes::Bytes;
use fragments::{convert, Fragment, FragmentError, FragmentStore, NewFragment, Payload};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

async fn stored(store: &FragmentStore, content_type: &str, data: Vec<u8>) -> Fragment {
    let mut fragment = Fragment::new(NewFragment::new("owner", content_type)).unwrap();
    fragment.set_data(store, Bytes::from(data)).await.unwrap();
    fragment
}

async fn convert_stored(
    store: &FragmentStore,
    fragment: &Fragment,
    ext: &str,
) -> Result<fragments::Converted, FragmentError> {
    let data = fragment.get_data(store).await?.unwrap_or_default();
    convert(&fragment.mime_type()?, data, ext).await
}

fn encoded(format: ImageFormat) -> Vec<u8> {
    let img = RgbaImage::from_pixel(8, 8, Rgba([200, 40, 40, 255]));
    let img = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(img).to_rgb8()),
        _ => DynamicImage::ImageRgba8(img),
    };
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

fn png_bytes() -> Vec<u8> {
    encoded(ImageFormat::Png)
}

const IMAGE_FORMATS: &[(&str, &str, ImageFormat)] = &[
    ("image/png", "png", ImageFormat::Png),
    ("image/jpeg", "jpg", ImageFormat::Jpeg),
    ("image/webp", "webp", ImageFormat::WebP),
    ("image/gif", "gif", ImageFormat::Gif),
    ("image/avif", "avif", ImageFormat::Avif),
];

/// Dimensions of an encoded image, going through the engine for AVIF
async fn dimensions(bytes: Bytes) -> (u32, u32) {
    let bytes = if image::guess_format(&bytes).unwrap() == ImageFormat::Avif {
        convert("image/avif", bytes, "png").await.unwrap().payload.into_bytes()
    } else {
        bytes
    };
    let decoded = image::load_from_memory(&bytes).unwrap();
    (decoded.width(), decoded.height())
}

#[tokio::test]
async fn test_markdown_to_html() {
    let store = FragmentStore::in_memory();
    let fragment = stored(&store, "text/markdown", b"# Hello **world**".to_vec()).await;

    let converted = convert_stored(&store, &fragment, "html").await.unwrap();
    assert_eq!(converted.mime_type, "text/html");
    assert!(converted
        .payload
        .as_text()
        .unwrap()
        .contains("<h1>Hello <strong>world</strong></h1>"));
}

#[tokio::test]
async fn test_csv_to_json() {
    let store = FragmentStore::in_memory();
    let fragment = stored(&store, "text/csv", b"name,age\nA,1\nB,2".to_vec()).await;

    let converted = convert_stored(&store, &fragment, "json").await.unwrap();
    let expected = serde_json::to_string_pretty(&serde_json::json!([
        {"name": "A", "age": "1"},
        {"name": "B", "age": "2"}
    ]))
    .unwrap();
    assert_eq!(converted.payload, Payload::Text(expected));
}

#[tokio::test]
async fn test_yaml_round_trip_through_json() {
    let store = FragmentStore::in_memory();
    let fragment = stored(&store, "application/yaml", b"name: John\ntags:\n  - a\n  - b\n".to_vec()).await;

    let json = convert_stored(&store, &fragment, "json").await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(json.payload.as_text().unwrap()).unwrap();
    assert_eq!(parsed, serde_json::json!({"name": "John", "tags": ["a", "b"]}));

    let yml = convert_stored(&store, &fragment, "yml").await.unwrap();
    assert_eq!(yml.mime_type, "application/yaml");
    assert_eq!(yml.payload.as_text(), Some("name: John\ntags:\n  - a\n  - b\n"));
}

#[tokio::test]
async fn test_same_type_is_identity() {
    let store = FragmentStore::in_memory();
    let text = stored(&store, "text/plain; charset=utf-8", b"just text".to_vec()).await;
    let converted = convert_stored(&store, &text, "txt").await.unwrap();
    assert_eq!(converted.payload, Payload::Text("just text".to_string()));

    let png = png_bytes();
    let image = stored(&store, "image/png", png.clone()).await;
    let converted = convert_stored(&store, &image, "png").await.unwrap();
    assert_eq!(converted.payload, Payload::Binary(Bytes::from(png)));
}

#[tokio::test]
async fn test_png_to_jpeg_and_webp() {
    let store = FragmentStore::in_memory();
    let fragment = stored(&store, "image/png", png_bytes()).await;

    for (ext, format, mime) in [
        ("jpg", ImageFormat::Jpeg, "image/jpeg"),
        ("webp", ImageFormat::WebP, "image/webp"),
    ] {
        let converted = convert_stored(&store, &fragment, ext).await.unwrap();
        assert_eq!(converted.mime_type, mime);

        let bytes = converted.payload.into_bytes();
        assert_eq!(image::guess_format(&bytes).unwrap(), format);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
    }
}

#[tokio::test]
async fn test_every_image_format_converts_to_every_other() {
    let store = FragmentStore::in_memory();

    for (source_mime, source_ext, source_format) in IMAGE_FORMATS {
        let fragment = stored(&store, source_mime, encoded(*source_format)).await;

        for (target_mime, target_ext, target_format) in IMAGE_FORMATS {
            if source_ext == target_ext {
                continue;
            }

            let converted = convert_stored(&store, &fragment, target_ext)
                .await
                .unwrap_or_else(|e| panic!("{} -> .{} failed: {}", source_mime, target_ext, e));
            assert_eq!(converted.mime_type, *target_mime);

            let bytes = converted.payload.into_bytes();
            assert_eq!(
                image::guess_format(&bytes).unwrap(),
                *target_format,
                "{} -> .{}",
                source_mime,
                target_ext
            );
            assert_eq!(dimensions(bytes).await, (8, 8), "{} -> .{}", source_mime, target_ext);
        }
    }
}

#[tokio::test]
async fn test_png_avif_png_round_trip() {
    let store = FragmentStore::in_memory();
    let png = stored(&store, "image/png", png_bytes()).await;

    let avif = convert_stored(&store, &png, "avif").await.unwrap().payload.into_bytes();
    let avif = stored(&store, "image/avif", avif.to_vec()).await;

    let back = convert_stored(&store, &avif, "png").await.unwrap();
    assert_eq!(back.mime_type, "image/png");
    let decoded = image::load_from_memory(&back.payload.into_bytes()).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (8, 8));

    let Rgba([r, g, b, a]) = *decoded.get_pixel(4, 4);
    assert!(r.abs_diff(200) <= 24 && g.abs_diff(40) <= 24 && b.abs_diff(40) <= 24);
    assert_eq!(a, 255);
}

#[tokio::test]
async fn test_text_identity_keeps_raw_bytes() {
    let store = FragmentStore::in_memory();
    let latin1 = b"name,city\nJos\xe9,M\xe1laga\n".to_vec();
    let fragment = stored(&store, "text/csv", latin1.clone()).await;

    let converted = convert_stored(&store, &fragment, "csv").await.unwrap();
    assert_eq!(converted.payload.into_bytes(), Bytes::from(latin1));
}

#[tokio::test]
async fn test_png_to_json_is_unsupported() {
    let store = FragmentStore::in_memory();
    let fragment = stored(&store, "image/png", png_bytes()).await;

    let err = convert_stored(&store, &fragment, "json").await.unwrap_err();
    assert!(matches!(err, FragmentError::UnsupportedConversion { .. }));
}

#[tokio::test]
async fn test_unknown_extension() {
    let store = FragmentStore::in_memory();
    let fragment = stored(&store, "text/plain", b"x".to_vec()).await;

    let err = convert_stored(&store, &fragment, "docx").await.unwrap_err();
    assert!(matches!(err, FragmentError::UnsupportedMediaType(_)));
}

#[tokio::test]
async fn test_malformed_source_fails() {
    let store = FragmentStore::in_memory();
    let fragment = stored(&store, "image/gif", b"GIF89a but not really".to_vec()).await;

    let err = convert_stored(&store, &fragment, "png").await.unwrap_err();
    assert!(matches!(err, FragmentError::ConversionFailure(_)));
}

#[test]
fn test_unrecognised_type_cannot_be_constructed() {
    let err = Fragment::new(NewFragment::new("owner", "audio/mpeg")).unwrap_err();
    assert!(matches!(err, FragmentError::Validation(_)));
}
