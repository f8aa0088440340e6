//! Shared fixtures for the end-to-end export tests: a small Web Mercator
//! WMTS served by `wiremock` and helpers to build requests against it.

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use image::{ImageFormat, Rgba, RgbaImage};
use tilestitch_common::config::Config;
use tilestitch_common::geo::{BoundingBox, Crs};
use tilestitch_core::ExportRequest;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const LAYER: &str = "basemap";
/// Layer published on a latitude-first EPSG:4326 grid.
pub const GEO_LAYER: &str = "worldmap";
pub const TILE_SIZE: u32 = 256;
pub const LEVELS: u32 = 8;

/// Path segment the tiles of each layer are served under.
pub const MERCATOR_TILES: &str = "tiles";
pub const GEOGRAPHIC_TILES: &str = "geo";

const MERCATOR_Z0_SCALE: f64 = 559_082_264.028_717_8;
const GEOGRAPHIC_Z0_SCALE: f64 = 279_541_132.014_358_8;
const ORIGIN: f64 = 20_037_508.342_789_2;

fn matrix(zoom: u32, scale: f64, top_left: &str, width: u32, height: u32) -> String {
    format!(
        r#"
      <TileMatrix>
        <ows:Identifier>{zoom}</ows:Identifier>
        <ScaleDenominator>{scale}</ScaleDenominator>
        <TopLeftCorner>{top_left}</TopLeftCorner>
        <TileWidth>{TILE_SIZE}</TileWidth><TileHeight>{TILE_SIZE}</TileHeight>
        <MatrixWidth>{width}</MatrixWidth><MatrixHeight>{height}</MatrixHeight>
      </TileMatrix>"#
    )
}

/// Capabilities of a service with one Web Mercator and one geographic layer
/// whose REST tile templates point back at `base`.
pub fn capabilities_xml(base: &str) -> String {
    let mercator: String = (0..LEVELS)
        .map(|zoom| {
            let size = 1u32 << zoom;
            let top_left = format!("-{ORIGIN} {ORIGIN}");
            matrix(zoom, MERCATOR_Z0_SCALE / size as f64, &top_left, size, size)
        })
        .collect();

    // EPSG:4326 URNs put latitude first, corners included.
    let geographic: String = (0..LEVELS)
        .map(|zoom| {
            let size = 1u32 << zoom;
            matrix(zoom, GEOGRAPHIC_Z0_SCALE / size as f64, "90 -180", size * 2, size)
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Capabilities xmlns="http://www.opengis.net/wmts/1.0"
              xmlns:ows="http://www.opengis.net/ows/1.1"
              xmlns:xlink="http://www.w3.org/1999/xlink" version="1.0.0">
  <ows:ServiceIdentification>
    <ows:Title>Mock Tiles</ows:Title>
  </ows:ServiceIdentification>
  <Contents>
    <Layer>
      <ows:Title>Mock Base Map</ows:Title>
      <ows:Identifier>{LAYER}</ows:Identifier>
      <Style isDefault="true"><ows:Identifier>default</ows:Identifier></Style>
      <Format>image/png</Format>
      <TileMatrixSetLink><TileMatrixSet>WebMercatorQuad</TileMatrixSet></TileMatrixSetLink>
      <ResourceURL format="image/png" resourceType="tile" template="{base}/{MERCATOR_TILES}/{{TileMatrix}}/{{TileRow}}/{{TileCol}}.png"/>
    </Layer>
    <Layer>
      <ows:Title>Mock World Map</ows:Title>
      <ows:Identifier>{GEO_LAYER}</ows:Identifier>
      <Style isDefault="true"><ows:Identifier>default</ows:Identifier></Style>
      <Format>image/png</Format>
      <TileMatrixSetLink><TileMatrixSet>WorldEPSG4326Quad</TileMatrixSet></TileMatrixSetLink>
      <ResourceURL format="image/png" resourceType="tile" template="{base}/{GEOGRAPHIC_TILES}/{{TileMatrix}}/{{TileRow}}/{{TileCol}}.png"/>
    </Layer>
    <TileMatrixSet>
      <ows:Identifier>WebMercatorQuad</ows:Identifier>
      <ows:Title>Google Maps Compatible</ows:Title>
      <ows:SupportedCRS>urn:ogc:def:crs:EPSG::3857</ows:SupportedCRS>{mercator}
    </TileMatrixSet>
    <TileMatrixSet>
      <ows:Identifier>WorldEPSG4326Quad</ows:Identifier>
      <ows:Title>World Geographic</ows:Title>
      <ows:SupportedCRS>urn:ogc:def:crs:EPSG::4326</ows:SupportedCRS>{geographic}
    </TileMatrixSet>
  </Contents>
</Capabilities>"#
    )
}

/// Starts a mock server that answers capabilities requests on `/wmts`.
pub async fn wmts_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wmts"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/xml")
                .set_body_string(capabilities_xml(&server.uri())),
        )
        .mount(&server)
        .await;
    server
}

/// Serves one solid-colour tile under `tiles` (one of [`MERCATOR_TILES`] or
/// [`GEOGRAPHIC_TILES`]), expecting it to be requested `times` times.
pub async fn mount_tile(
    server: &MockServer,
    tiles: &str,
    (zoom, row, col): (u32, u32, u32),
    color: [u8; 4],
    times: u64,
) {
    Mock::given(method("GET"))
        .and(path(format!("/{tiles}/{zoom}/{row}/{col}.png")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(png(color)),
        )
        .expect(times)
        .mount(server)
        .await;
}

pub fn png(color: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(TILE_SIZE, TILE_SIZE, Rgba(color));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

pub fn config(cache_dir: &Path) -> Config {
    Config {
        cache_dir: cache_dir.to_path_buf(),
        concurrency: 4,
        retries: 0,
        timeout: Duration::from_secs(5),
        quiet: 2,
    }
}

pub fn request(server: &MockServer, workdir: &Path, zoom: u32, srs: Crs) -> ExportRequest {
    ExportRequest {
        wmts_url: format!("{}/wmts", server.uri()),
        layer: LAYER.to_string(),
        zoom,
        bbox: BoundingBox::new(-10.0, -10.0, 10.0, 10.0).expect("valid bbox"),
        output: workdir.join("output.gtiff"),
        mapproxy_config: workdir.join("mapproxy_config.yaml"),
        srs,
    }
}
