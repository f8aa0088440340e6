//! Construction of WMTS request URLs.
//!
//! Capabilities are requested with KVP encoding. Tiles are requested through
//! the layer's RESTful `ResourceURL` template when one is advertised and
//! through `GetTile` KVP requests otherwise.

use tracing::debug;
use url::Url;

use crate::capabilities::{Capabilities, Layer};

const WMTS_VERSION: &str = "1.0.0";

/// Query keys owned by the WMTS KVP binding; they are dropped from a base
/// URL before a new request is appended to it.
const WMTS_KEYS: &[&str] = &[
    "service",
    "request",
    "version",
    "layer",
    "style",
    "format",
    "tilematrixset",
    "tilematrix",
    "tilerow",
    "tilecol",
];

/// Derives the GetCapabilities URL from what the user passed on the command line.
///
/// URLs that already name a request or point at a static `.xml` document are
/// returned as they are.
pub fn capabilities_url(service_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(service_url.trim())?;

    let has_request = url
        .query_pairs()
        .any(|(key, _)| key.eq_ignore_ascii_case("request"));
    let is_document = url.path().to_ascii_lowercase().ends_with(".xml");
    if has_request || is_document {
        return Ok(url);
    }

    url.query_pairs_mut()
        .append_pair("SERVICE", "WMTS")
        .append_pair("REQUEST", "GetCapabilities")
        .append_pair("VERSION", WMTS_VERSION);
    Ok(url)
}

/// Where the tiles of one layer in one tile matrix set are requested from.
#[derive(Clone, Debug, PartialEq)]
pub enum TileEndpoint {
    Rest {
        /// Template with every placeholder except row, column and matrix filled in.
        template: String,
    },
    Kvp {
        base: Url,
        layer: String,
        style: String,
        tile_matrix_set: String,
        format: String,
        /// Dimension identifiers with their default values, sent as extra keys.
        dimensions: Vec<(String, String)>,
    },
}

impl TileEndpoint {
    pub fn for_layer(
        capabilities: &Capabilities,
        service_url: &Url,
        layer: &Layer,
        tile_matrix_set: &str,
    ) -> Result<Self, url::ParseError> {
        if let Some(resource) = layer.tile_template() {
            let mut values: Vec<(&str, &str)> = vec![
                ("style", layer.default_style()),
                ("tilematrixset", tile_matrix_set),
            ];
            values.extend(
                layer
                    .dimensions
                    .iter()
                    .map(|(id, default)| (id.as_str(), default.as_str())),
            );
            let template = substitute(&resource.template, &values);
            debug!("Layer '{}' serves RESTful tiles from {template}", layer.identifier);
            return Ok(TileEndpoint::Rest { template });
        }

        let base = match capabilities.get_tile_kvp.as_deref() {
            Some(href) => Url::parse(href)?,
            None => service_url.clone(),
        };
        debug!("Layer '{}' has no tile template, using GetTile on {base}", layer.identifier);

        Ok(TileEndpoint::Kvp {
            base: strip_wmts_keys(base),
            layer: layer.identifier.clone(),
            style: layer.default_style().to_string(),
            tile_matrix_set: tile_matrix_set.to_string(),
            format: layer.default_format().to_string(),
            dimensions: layer.dimensions.clone(),
        })
    }

    pub fn tile_url(&self, tile_matrix: &str, row: u32, col: u32) -> Result<Url, url::ParseError> {
        match self {
            TileEndpoint::Rest { template } => {
                let row = row.to_string();
                let col = col.to_string();
                let url = substitute(
                    template,
                    &[
                        ("tilematrix", tile_matrix),
                        ("tilerow", row.as_str()),
                        ("tilecol", col.as_str()),
                    ],
                );
                Url::parse(&url)
            }
            TileEndpoint::Kvp {
                base,
                layer,
                style,
                tile_matrix_set,
                format,
                dimensions,
            } => {
                let mut url = base.clone();
                url.query_pairs_mut()
                    .append_pair("SERVICE", "WMTS")
                    .append_pair("REQUEST", "GetTile")
                    .append_pair("VERSION", WMTS_VERSION)
                    .append_pair("LAYER", layer)
                    .append_pair("STYLE", style)
                    .append_pair("TILEMATRIXSET", tile_matrix_set)
                    .append_pair("TILEMATRIX", tile_matrix)
                    .append_pair("TILEROW", &row.to_string())
                    .append_pair("TILECOL", &col.to_string())
                    .append_pair("FORMAT", format)
                    .extend_pairs(dimensions);
                Ok(url)
            }
        }
    }
}

/// Replaces `{Key}` placeholders, matching keys case-insensitively.
///
/// Placeholders without a value are kept verbatim so a later pass can fill them.
fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let key = &after[..close];
        match values.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn strip_wmts_keys(mut url: Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !WMTS_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k)))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url
}
