#![cfg(test)]
use std::fs::File;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tilestitch_common::geo::Crs;
use tilestitch_core::geotiff::{GEO_KEY_DIRECTORY_TAG, MODEL_PIXEL_SCALE_TAG, MODEL_TIEPOINT_TAG};
use tilestitch_core::{ExportSummary, NoProgress, export};
use tilestitch_common::geo::BoundingBox;
use tilestitch_integration_tests::{
    GEO_LAYER, GEOGRAPHIC_TILES, LAYER, MERCATOR_TILES, config, mount_tile, png, request,
    wmts_server,
};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];
const YELLOW: [u8; 4] = [255, 255, 0, 255];

/// At zoom 2 the box -10..10 degrees touches rows 1-2 and columns 1-2.
async fn mount_zoom2_tiles(server: &MockServer, times: u64) {
    mount_tile(server, MERCATOR_TILES, (2, 1, 1), RED, times).await;
    mount_tile(server, MERCATOR_TILES, (2, 1, 2), GREEN, times).await;
    mount_tile(server, MERCATOR_TILES, (2, 2, 1), BLUE, times).await;
    mount_tile(server, MERCATOR_TILES, (2, 2, 2), YELLOW, times).await;
}

/// On the geographic grid zoom 1 has 90 degree tiles, so the same box
/// touches rows 0-1 and columns 1-2.
async fn mount_geographic_zoom1_tiles(server: &MockServer) {
    mount_tile(server, GEOGRAPHIC_TILES, (1, 0, 1), RED, 1).await;
    mount_tile(server, GEOGRAPHIC_TILES, (1, 0, 2), GREEN, 1).await;
    mount_tile(server, GEOGRAPHIC_TILES, (1, 1, 1), BLUE, 1).await;
    mount_tile(server, GEOGRAPHIC_TILES, (1, 1, 2), YELLOW, 1).await;
}

fn read_rgba(path: &std::path::Path) -> (u32, u32, Vec<u8>) {
    let mut decoder = Decoder::new(File::open(path).unwrap()).unwrap();
    let (width, height) = decoder.dimensions().unwrap();
    match decoder.read_image().unwrap() {
        DecodingResult::U8(pixels) => (width, height, pixels),
        _ => panic!("expected 8-bit RGBA samples"),
    }
}

fn pixel(pixels: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let offset = ((y * width + x) * 4) as usize;
    pixels[offset..offset + 4].try_into().unwrap()
}

#[tokio::test]
async fn exports_mercator_geotiff_with_seed_config() {
    let server = wmts_server().await;
    mount_zoom2_tiles(&server, 1).await;
    let workdir = tempfile::tempdir().unwrap();
    let cache = workdir.path().join("cache_data");

    let request = request(&server, workdir.path(), 2, Crs::WebMercator);
    let summary: ExportSummary = export(&request, &config(&cache), &NoProgress)
        .await
        .expect("export should succeed");

    assert_eq!(summary.tiles, 4);
    assert_eq!(summary.downloaded, 4);
    assert_eq!(summary.cached, 0);
    assert_eq!(summary.missing, 0);
    assert_eq!(summary.tile_matrix, "2");
    assert_eq!(summary.crs, Crs::WebMercator);

    // The clipped raster keeps the level resolution, so about 57 px a side.
    let (width, height, pixels) = read_rgba(&request.output);
    assert_eq!((width, height), (summary.width, summary.height));
    assert!((55..=59).contains(&width), "unexpected width {width}");
    assert!((55..=59).contains(&height), "unexpected height {height}");

    assert_eq!(pixel(&pixels, width, 0, 0), RED);
    assert_eq!(pixel(&pixels, width, width - 1, 0), GREEN);
    assert_eq!(pixel(&pixels, width, 0, height - 1), BLUE);
    assert_eq!(pixel(&pixels, width, width - 1, height - 1), YELLOW);

    let mut decoder = Decoder::new(File::open(&request.output).unwrap()).unwrap();
    let keys = decoder
        .get_tag_u16_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG))
        .unwrap();
    assert!(keys.windows(4).any(|entry| entry == [3072, 0, 1, 3857]));

    let scale = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE_TAG))
        .unwrap();
    assert!((scale[0] - 39_135.758_482_8).abs() < 1e-3);
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT_TAG))
        .unwrap();
    assert!((tiepoint[3] + 1_113_194.9).abs() < scale[0]);
    assert!((tiepoint[4] - 1_118_889.97).abs() < scale[1]);

    let yaml = std::fs::read_to_string(&request.mapproxy_config).unwrap();
    assert!(yaml.contains("wmts_layer: basemap"));
    assert!(yaml.contains("wmts_tile_matrix_set: WebMercatorQuad"));
    assert!(yaml.contains("Google Maps Compatible"));

    let level_dir = cache.join(format!("{LAYER}_cache_EPSG3857")).join("2");
    for (row, col) in [(1, 1), (1, 2), (2, 1), (2, 2)] {
        let tile = level_dir.join(row.to_string()).join(format!("{col}.png"));
        assert!(tile.is_file(), "{} was not cached", tile.display());
    }
}

#[tokio::test]
async fn second_run_is_served_from_cache() {
    let server = wmts_server().await;
    // Each tile may be downloaded once across both runs.
    mount_zoom2_tiles(&server, 1).await;
    let workdir = tempfile::tempdir().unwrap();
    let cfg = config(&workdir.path().join("cache_data"));
    let request = request(&server, workdir.path(), 2, Crs::WebMercator);

    let first = export(&request, &cfg, &NoProgress).await.unwrap();
    let first_pixels = read_rgba(&request.output);
    std::fs::remove_file(&request.output).unwrap();

    let second = export(&request, &cfg, &NoProgress).await.unwrap();

    assert_eq!(first.downloaded, 4);
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.cached, 4);
    assert_eq!(read_rgba(&request.output), first_pixels);
}

#[tokio::test]
async fn geographic_output_is_tagged_4326() {
    let server = wmts_server().await;
    mount_zoom2_tiles(&server, 1).await;
    let workdir = tempfile::tempdir().unwrap();

    let request = request(&server, workdir.path(), 2, Crs::WGS84);
    let summary = export(&request, &config(&workdir.path().join("cache")), &NoProgress)
        .await
        .unwrap();

    assert_eq!(summary.crs, Crs::WGS84);
    assert!((summary.bounds.min_x + 10.0).abs() < 0.5);
    assert!((summary.bounds.max_y - 10.0).abs() < 0.5);

    let mut decoder = Decoder::new(File::open(&request.output).unwrap()).unwrap();
    let keys = decoder
        .get_tag_u16_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG))
        .unwrap();
    assert!(keys.windows(4).any(|entry| entry == [2048, 0, 1, 4326]));

    let (width, height, pixels) = read_rgba(&request.output);
    assert_eq!(pixel(&pixels, width, 1, 1), RED);
    assert_eq!(pixel(&pixels, width, width - 2, height - 2), YELLOW);
}

#[tokio::test]
async fn unknown_layer_is_reported() {
    let server = wmts_server().await;
    let workdir = tempfile::tempdir().unwrap();
    let mut request = request(&server, workdir.path(), 2, Crs::WebMercator);
    request.layer = "roads".to_string();

    let err = export(&request, &config(&workdir.path().join("cache")), &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Layer \"roads\" not found in provided WMTS service"
    );
    assert!(!request.output.exists());
}

#[tokio::test]
async fn zoom_beyond_the_matrix_set_fails() {
    let server = wmts_server().await;
    let workdir = tempfile::tempdir().unwrap();
    let request = request(&server, workdir.path(), 9, Crs::WebMercator);

    let err = export(&request, &config(&workdir.path().join("cache")), &NoProgress)
        .await
        .unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("zoom level 9 is out of range"), "{message}");
    assert!(!request.mapproxy_config.exists());
}

#[tokio::test]
async fn no_tiles_means_no_data() {
    // Tile requests fall through to the mock server's default 404.
    let server = wmts_server().await;
    let workdir = tempfile::tempdir().unwrap();
    let request = request(&server, workdir.path(), 2, Crs::WebMercator);

    let err = export(&request, &config(&workdir.path().join("cache")), &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(
        format!("{err:#}"),
        format!("No data found for layer {LAYER} at zoom level 2")
    );
    assert!(!request.output.exists());
}

#[tokio::test]
async fn geographic_grid_is_warped_to_mercator() {
    let server = wmts_server().await;
    mount_geographic_zoom1_tiles(&server).await;
    let workdir = tempfile::tempdir().unwrap();
    let cache = workdir.path().join("cache_data");

    let mut request = request(&server, workdir.path(), 1, Crs::WebMercator);
    request.layer = GEO_LAYER.to_string();
    let summary = export(&request, &config(&cache), &NoProgress).await.unwrap();

    assert_eq!(summary.tile_matrix_set, "WorldEPSG4326Quad");
    assert_eq!(summary.tiles, 4);
    assert_eq!(summary.downloaded, 4);
    assert_eq!(summary.crs, Crs::WebMercator);
    // Clipped to whole pixels of 90/256 degrees before warping.
    assert!((summary.bounds.min_x + 1_113_194.9).abs() < 45_000.0);
    assert!((summary.bounds.max_y - 1_118_889.97).abs() < 45_000.0);

    let mut decoder = Decoder::new(File::open(&request.output).unwrap()).unwrap();
    let keys = decoder
        .get_tag_u16_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG))
        .unwrap();
    assert!(keys.windows(4).any(|entry| entry == [3072, 0, 1, 3857]));

    let (width, height, pixels) = read_rgba(&request.output);
    assert!((50..=65).contains(&width), "unexpected width {width}");
    assert_eq!(pixel(&pixels, width, 1, 1), RED);
    assert_eq!(pixel(&pixels, width, width - 2, 1), GREEN);
    assert_eq!(pixel(&pixels, width, 1, height - 2), BLUE);
    assert_eq!(pixel(&pixels, width, width - 2, height - 2), YELLOW);

    let yaml = std::fs::read_to_string(&request.mapproxy_config).unwrap();
    assert!(yaml.contains("srs: EPSG:4326"));

    let tile = cache
        .join(format!("{GEO_LAYER}_cache_EPSG4326"))
        .join("1")
        .join("0")
        .join("1.png");
    assert!(tile.is_file(), "{} was not cached", tile.display());
}

#[tokio::test]
async fn oversized_mosaic_is_refused_before_downloading() {
    let server = wmts_server().await;
    Mock::given(method("GET"))
        .and(path_regex(format!("^/{MERCATOR_TILES}/")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(png(RED)),
        )
        .expect(0)
        .mount(&server)
        .await;
    let workdir = tempfile::tempdir().unwrap();
    let cache = workdir.path().join("cache");

    // 128 x 54 tiles of 256 px at zoom 7.
    let mut request = request(&server, workdir.path(), 7, Crs::WebMercator);
    request.bbox = BoundingBox::new(-180.0, -60.0, 180.0, 60.0).unwrap();
    let err = export(&request, &config(&cache), &NoProgress)
        .await
        .unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("32768x13824 pixels is too large"), "{message}");
    assert!(!cache.exists());
    assert!(!request.output.exists());
}
