//! # WMTS Capabilities Model
//!
//! Parses the `GetCapabilities` response of an OGC WMTS 1.0.0 service into
//! the pieces needed to request tiles: layers with their formats, styles and
//! resource templates, and the tile matrix sets they are published in.
//!
//! Elements are matched by local name only, so documents that bind the WMTS
//! or OWS namespaces to unusual prefixes still parse.

use std::str::FromStr;

use roxmltree::{Document, Node};
use thiserror::Error;
use tilestitch_common::geo::{BoundingBox, Crs};
use tracing::debug;

const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

#[derive(Debug, Error)]
pub enum CapabilitiesError {
    #[error("malformed capabilities document: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("service answered with an exception: {0}")]
    Exception(String),

    #[error("not a WMTS capabilities document (root element <{0}>)")]
    NotCapabilities(String),

    #[error("missing <{element}> in {context}")]
    Missing {
        element: &'static str,
        context: String,
    },

    #[error("invalid number '{value}' in <{element}>")]
    Number { element: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Capabilities {
    pub title: Option<String>,
    /// `Get` endpoint of the `GetTile` operation that accepts KVP encoding.
    pub get_tile_kvp: Option<String>,
    pub layers: Vec<Layer>,
    pub tile_matrix_sets: Vec<TileMatrixSet>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub identifier: String,
    pub title: String,
    pub wgs84_bbox: Option<BoundingBox>,
    pub formats: Vec<String>,
    /// Style identifiers, the default style first.
    pub styles: Vec<String>,
    /// Linked tile matrix set identifiers in document order.
    pub tile_matrix_set_links: Vec<String>,
    pub resource_urls: Vec<ResourceUrl>,
    /// Dimension identifiers with their default value.
    pub dimensions: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResourceUrl {
    pub format: String,
    pub resource_type: String,
    pub template: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TileMatrixSet {
    pub identifier: String,
    pub title: String,
    pub supported_crs: String,
    pub wgs84_bbox: Option<BoundingBox>,
    pub matrices: Vec<TileMatrix>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TileMatrix {
    pub identifier: String,
    pub scale_denominator: f64,
    /// Upper left corner as `(x, y)`, whatever the axis order of the CRS.
    pub top_left: (f64, f64),
    pub tile_width: u32,
    pub tile_height: u32,
    pub matrix_width: u32,
    pub matrix_height: u32,
}

impl Capabilities {
    pub fn parse(xml: &str) -> Result<Self, CapabilitiesError> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();

        match root.tag_name().name() {
            "Capabilities" => {}
            "ExceptionReport" => return Err(CapabilitiesError::Exception(exception_text(root))),
            other => return Err(CapabilitiesError::NotCapabilities(other.to_string())),
        }

        let title = child(root, "ServiceIdentification")
            .and_then(|id| child_text(id, "Title"))
            .map(str::to_string);

        let get_tile_kvp = child(root, "OperationsMetadata").and_then(get_tile_kvp_href);

        let contents = child(root, "Contents").ok_or_else(|| CapabilitiesError::Missing {
            element: "Contents",
            context: "Capabilities".to_string(),
        })?;

        let layers = children(contents, "Layer")
            .map(parse_layer)
            .collect::<Result<Vec<_>, _>>()?;

        let tile_matrix_sets = children(contents, "TileMatrixSet")
            .map(parse_tile_matrix_set)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            title,
            get_tile_kvp,
            layers,
            tile_matrix_sets,
        })
    }

    pub fn layer(&self, identifier: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.identifier == identifier)
    }

    pub fn tile_matrix_set(&self, identifier: &str) -> Option<&TileMatrixSet> {
        self.tile_matrix_sets
            .iter()
            .find(|set| set.identifier == identifier)
    }
}

impl Layer {
    /// File extension derived from the first advertised MIME type.
    ///
    /// `image/png` becomes `png`, `image/jpeg; charset=x` becomes `jpeg`.
    pub fn format_extension(&self) -> String {
        self.formats
            .first()
            .and_then(|mime| mime.split(';').next())
            .and_then(|mime| mime.trim().rsplit('/').next())
            .filter(|ext| !ext.is_empty())
            .unwrap_or("png")
            .to_string()
    }

    pub fn default_format(&self) -> &str {
        self.formats.first().map(String::as_str).unwrap_or("image/png")
    }

    pub fn default_style(&self) -> &str {
        self.styles.first().map(String::as_str).unwrap_or("default")
    }

    /// The `tile` resource template matching the default format, or any
    /// `tile` template when none matches.
    pub fn tile_template(&self) -> Option<&ResourceUrl> {
        let tiles = || {
            self.resource_urls
                .iter()
                .filter(|res| res.resource_type.eq_ignore_ascii_case("tile"))
        };
        tiles()
            .find(|res| res.format == self.default_format())
            .or_else(|| tiles().next())
    }
}

impl TileMatrixSet {
    pub fn crs(&self) -> Result<Crs, tilestitch_common::geo::GeoError> {
        Crs::from_str(&self.supported_crs)
    }
}

fn parse_layer(node: Node) -> Result<Layer, CapabilitiesError> {
    let identifier = required_text(node, "Identifier", "Layer")?.to_string();
    let title = child_text(node, "Title")
        .map(str::to_string)
        .unwrap_or_else(|| identifier.clone());

    let wgs84_bbox = child(node, "WGS84BoundingBox")
        .and_then(|bbox| optional_bbox(bbox, false, &identifier));

    let formats = children(node, "Format")
        .filter_map(|n| n.text())
        .map(|text| text.trim().to_string())
        .collect();

    let mut styles: Vec<(bool, String)> = children(node, "Style")
        .filter_map(|style| {
            let id = child_text(style, "Identifier")?;
            let is_default = style
                .attribute("isDefault")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
            Some((is_default, id.to_string()))
        })
        .collect();
    styles.sort_by_key(|(is_default, _)| !*is_default);

    let tile_matrix_set_links = children(node, "TileMatrixSetLink")
        .filter_map(|link| child_text(link, "TileMatrixSet"))
        .map(str::to_string)
        .collect();

    let resource_urls = children(node, "ResourceURL")
        .filter_map(|res| {
            Some(ResourceUrl {
                format: res.attribute("format").unwrap_or_default().to_string(),
                resource_type: res.attribute("resourceType").unwrap_or("tile").to_string(),
                template: res.attribute("template")?.to_string(),
            })
        })
        .collect();

    let dimensions = children(node, "Dimension")
        .filter_map(|dim| {
            let id = child_text(dim, "Identifier")?;
            let default = child_text(dim, "Default")
                .or_else(|| child_text(dim, "Value"))?;
            Some((id.to_string(), default.to_string()))
        })
        .collect();

    Ok(Layer {
        identifier,
        title,
        wgs84_bbox,
        formats,
        styles: styles.into_iter().map(|(_, id)| id).collect(),
        tile_matrix_set_links,
        resource_urls,
        dimensions,
    })
}

fn parse_tile_matrix_set(node: Node) -> Result<TileMatrixSet, CapabilitiesError> {
    let identifier = required_text(node, "Identifier", "TileMatrixSet")?.to_string();
    let title = child_text(node, "Title")
        .map(str::to_string)
        .unwrap_or_else(|| identifier.clone());
    let supported_crs = required_text(node, "SupportedCRS", &identifier)?.to_string();
    let lat_first = Crs::from_str(&supported_crs).is_ok_and(|crs| crs.lat_first());

    let wgs84_bbox = match child(node, "WGS84BoundingBox") {
        Some(bbox) => optional_bbox(bbox, false, &identifier),
        None => projected_bbox_as_wgs84(node, &identifier, &supported_crs),
    };

    let matrices = children(node, "TileMatrix")
        .map(|matrix| parse_tile_matrix(matrix, lat_first))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TileMatrixSet {
        identifier,
        title,
        supported_crs,
        wgs84_bbox,
        matrices,
    })
}

/// Reads an `ows:BoundingBox` of the set and expresses it in WGS84 when its
/// CRS is one we can transform.
fn projected_bbox_as_wgs84(node: Node, owner: &str, set_crs: &str) -> Option<BoundingBox> {
    let bbox_node = child(node, "BoundingBox")?;
    let crs_name = bbox_node.attribute("crs").unwrap_or(set_crs);
    let crs = Crs::from_str(crs_name).ok()?;
    let bbox = optional_bbox(bbox_node, crs.lat_first(), owner)?;
    Some(bbox.transform(&crs, &Crs::WGS84))
}

fn parse_tile_matrix(node: Node, lat_first: bool) -> Result<TileMatrix, CapabilitiesError> {
    let identifier = required_text(node, "Identifier", "TileMatrix")?.to_string();
    let context = format!("TileMatrix '{identifier}'");

    let scale_denominator = number(required_text(node, "ScaleDenominator", &context)?, "ScaleDenominator")?;
    let corner = pair(required_text(node, "TopLeftCorner", &context)?, "TopLeftCorner")?;
    let top_left = if lat_first { (corner.1, corner.0) } else { corner };

    Ok(TileMatrix {
        identifier,
        scale_denominator,
        top_left,
        tile_width: integer(required_text(node, "TileWidth", &context)?, "TileWidth")?,
        tile_height: integer(required_text(node, "TileHeight", &context)?, "TileHeight")?,
        matrix_width: integer(required_text(node, "MatrixWidth", &context)?, "MatrixWidth")?,
        matrix_height: integer(required_text(node, "MatrixHeight", &context)?, "MatrixHeight")?,
    })
}

/// Extents are informative. A box that crosses the antimeridian or has no
/// area is dropped instead of failing the whole document.
fn optional_bbox(node: Node, lat_first: bool, owner: &str) -> Option<BoundingBox> {
    match parse_bbox(node, lat_first) {
        Ok(bbox) => Some(bbox),
        Err(err) => {
            debug!("Ignoring bounding box of '{owner}': {err}");
            None
        }
    }
}

fn parse_bbox(node: Node, lat_first: bool) -> Result<BoundingBox, CapabilitiesError> {
    let lower = pair(required_text(node, "LowerCorner", "BoundingBox")?, "LowerCorner")?;
    let upper = pair(required_text(node, "UpperCorner", "BoundingBox")?, "UpperCorner")?;
    let (lower, upper) = if lat_first {
        ((lower.1, lower.0), (upper.1, upper.0))
    } else {
        (lower, upper)
    };
    BoundingBox::new(lower.0, lower.1, upper.0, upper.1).map_err(|_| CapabilitiesError::Number {
        element: "BoundingBox",
        value: format!("{} {} {} {}", lower.0, lower.1, upper.0, upper.1),
    })
}

fn get_tile_kvp_href(operations: Node) -> Option<String> {
    let get_tile = children(operations, "Operation")
        .find(|op| op.attribute("name") == Some("GetTile"))?;

    get_tile
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "Get")
        .find(|get| {
            let constraints: Vec<Node> = children(*get, "Constraint").collect();
            constraints.is_empty()
                || constraints.iter().any(|c| {
                    c.descendants().any(|v| {
                        v.tag_name().name() == "Value"
                            && v.text().is_some_and(|t| t.trim().eq_ignore_ascii_case("KVP"))
                    })
                })
        })
        .and_then(|get| get.attribute((XLINK_NS, "href")))
        .map(str::to_string)
}

fn exception_text(root: Node) -> String {
    let texts: Vec<&str> = root
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "ExceptionText")
        .filter_map(|n| n.text())
        .map(str::trim)
        .collect();
    if texts.is_empty() {
        "no exception text given".to_string()
    } else {
        texts.join("; ")
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    children(node, name).next()
}

fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

fn required_text<'a>(
    node: Node<'a, '_>,
    element: &'static str,
    context: &str,
) -> Result<&'a str, CapabilitiesError> {
    child_text(node, element).ok_or_else(|| CapabilitiesError::Missing {
        element,
        context: context.to_string(),
    })
}

fn number(text: &str, element: &'static str) -> Result<f64, CapabilitiesError> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CapabilitiesError::Number {
            element,
            value: text.to_string(),
        })
}

fn integer(text: &str, element: &'static str) -> Result<u32, CapabilitiesError> {
    text.trim().parse::<u32>().map_err(|_| CapabilitiesError::Number {
        element,
        value: text.to_string(),
    })
}

fn pair(text: &str, element: &'static str) -> Result<(f64, f64), CapabilitiesError> {
    let values: Vec<&str> = text.split_whitespace().collect();
    match values.as_slice() {
        [a, b] => Ok((number(a, element)?, number(b, element)?)),
        _ => Err(CapabilitiesError::Number {
            element,
            value: text.to_string(),
        }),
    }
}
