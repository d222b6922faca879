use crate::error::RenderError;
use crate::font::FontGate;
use crate::types::{Matrix, Rect};
use crate::values::{Length, parse_transform, parse_url_ref, parse_viewbox};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

pub(crate) const DEFAULT_FONT_SIZE: f32 = 16.0;

pub type NodeId = usize;

/// Dispatch class of an element, keyed by its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderingHint {
    None,
    Shape,
    Text,
    Image,
    Clipping,
    Masking,
    Containment,
}

impl RenderingHint {
    pub fn for_tag(tag: &str) -> RenderingHint {
        match tag {
            "rect" | "circle" | "ellipse" | "line" | "polyline" | "polygon" | "path" => {
                RenderingHint::Shape
            }
            "text" => RenderingHint::Text,
            "image" => RenderingHint::Image,
            "clipPath" => RenderingHint::Clipping,
            "mask" => RenderingHint::Masking,
            "svg" | "g" | "symbol" | "marker" | "pattern" | "use" | "defs" | "a" | "switch" => {
                RenderingHint::Containment
            }
            _ => RenderingHint::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Other,
}

#[derive(Debug)]
enum NodeData {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        // (name, value, important)
        style: Vec<(String, String, bool)>,
    },
    Text(String),
}

#[derive(Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Read-only arena view of a parsed SVG document.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    ids: HashMap<String, NodeId>,
    base: Option<PathBuf>,
    font_gate: FontGate,
}

impl Document {
    pub fn parse(xml: &str) -> Result<Document, RenderError> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let parsed = roxmltree::Document::parse_with_options(xml, options)?;
        let root = parsed.root_element();
        if root.tag_name().name() != "svg" {
            return Err(RenderError::Parse(format!(
                "root element is <{}>, expected <svg>",
                root.tag_name().name()
            )));
        }
        let mut doc = Document {
            nodes: Vec::new(),
            root: 0,
            ids: HashMap::new(),
            base: None,
            font_gate: FontGate::default(),
        };
        doc.root = doc.import(root, None);
        Ok(doc)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Document, RenderError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut doc = Document::parse(&text)?;
        doc.base = path.parent().map(Path::to_path_buf);
        Ok(doc)
    }

    // Directory that relative image references resolve against.
    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_font_gate(mut self, gate: FontGate) -> Self {
        self.font_gate = gate;
        self
    }

    pub fn font_gate(&self) -> &FontGate {
        &self.font_gate
    }

    pub fn base(&self) -> Option<&Path> {
        self.base.as_deref()
    }

    pub fn root(&self) -> Element<'_> {
        Element {
            doc: self,
            id: self.root,
            scope: None,
        }
    }

    /// Element view whose render parent chain follows the DOM ancestry.
    pub fn element(&self, id: NodeId) -> Option<Element<'_>> {
        if !matches!(self.nodes.get(id)?.data, NodeData::Element { .. }) {
            return None;
        }
        let scope = self.nodes[id]
            .parent
            .and_then(|parent| self.element(parent))
            .map(Rc::new);
        Some(Element {
            doc: self,
            id,
            scope,
        })
    }

    pub fn node_by_id(&self, id: &str) -> Option<NodeId> {
        self.ids.get(id).copied()
    }

    // Only same-document fragment references resolve.
    pub fn node_by_uri(&self, uri: &str) -> Option<NodeId> {
        let (doc_part, fragment) = uri.rsplit_once('#')?;
        if !doc_part.is_empty() {
            let own = self.base.as_deref().map(|b| b.to_string_lossy().into_owned());
            if own.as_deref() != Some(doc_part) {
                return None;
            }
        }
        self.node_by_id(fragment)
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id).map_or(&[], |n| n.children.as_slice())
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id)?.parent
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        match &node.data {
            NodeData::Text(text) => out.push_str(text),
            NodeData::Element { .. } => {
                for child in &node.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    fn import(&mut self, node: roxmltree::Node<'_, '_>, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        let mut attrs = Vec::new();
        let mut style = Vec::new();
        for attr in node.attributes() {
            let name = match attr.namespace() {
                Some(XLINK_NS) => format!("xlink:{}", attr.name()),
                Some(XML_NS) => format!("xml:{}", attr.name()),
                _ => attr.name().to_string(),
            };
            if name == "style" {
                style = parse_style_declarations(attr.value());
            }
            if name == "id" && !self.ids.contains_key(attr.value()) {
                // First definition wins for duplicate ids.
                self.ids.insert(attr.value().to_string(), id);
            }
            attrs.push((name, attr.value().to_string()));
        }
        self.nodes.push(Node {
            data: NodeData::Element {
                tag: node.tag_name().name().to_string(),
                attrs,
                style,
            },
            parent,
            children: Vec::new(),
        });
        for child in node.children() {
            let child_id = if child.is_element() {
                self.import(child, Some(id))
            } else if child.is_text() {
                let text_id = self.nodes.len();
                self.nodes.push(Node {
                    data: NodeData::Text(child.text().unwrap_or_default().to_string()),
                    parent: Some(id),
                    children: Vec::new(),
                });
                text_id
            } else {
                continue;
            };
            self.nodes[id].children.push(child_id);
        }
        id
    }
}

fn parse_style_declarations(input: &str) -> Vec<(String, String, bool)> {
    let mut out = Vec::new();
    for decl in input.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let Some((k, v)) = decl.split_once(':') else {
            continue;
        };
        let key = k.trim().to_ascii_lowercase();
        let mut val = v.trim();
        let important = match val.strip_suffix("!important") {
            Some(rest) => {
                val = rest.trim_end();
                true
            }
            None => false,
        };
        if !key.is_empty() && !val.is_empty() {
            out.push((key, val.to_string(), important));
        }
    }
    out
}

fn is_inherited(name: &str) -> bool {
    !matches!(
        name,
        "opacity"
            | "clip-path"
            | "clip"
            | "mask"
            | "overflow"
            | "display"
            | "stop-color"
            | "stop-opacity"
            | "baseline-shift"
            | "transform"
            | "filter"
    )
}

/// Child of an element in document order.
pub enum Content<'a> {
    Element(Element<'a>),
    Text(&'a str),
}

/// Styled view of one element. `scope` is the element that instantiated this
/// one during rendering, which is the DOM parent except under `<use>`.
#[derive(Clone)]
pub struct Element<'a> {
    doc: &'a Document,
    id: NodeId,
    scope: Option<Rc<Element<'a>>>,
}

impl std::fmt::Debug for Element<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{} #{}>", self.tag(), self.id)
    }
}

impl<'a> Element<'a> {
    pub fn node_id(&self) -> NodeId {
        self.id
    }

    pub fn document(&self) -> &'a Document {
        self.doc
    }

    fn data(&self) -> (&'a str, &'a [(String, String)], &'a [(String, String, bool)]) {
        match &self.doc.nodes[self.id].data {
            NodeData::Element { tag, attrs, style } => (tag, attrs, style),
            NodeData::Text(_) => ("", &[], &[]),
        }
    }

    pub fn tag(&self) -> &'a str {
        self.data().0
    }

    pub fn hint(&self) -> RenderingHint {
        RenderingHint::for_tag(self.tag())
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.data()
            .1
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_presentation_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn xml_id(&self) -> Option<&'a str> {
        self.attr("id")
    }

    pub fn href(&self) -> Option<&'a str> {
        self.attr("xlink:href").or_else(|| self.attr("href"))
    }

    pub fn parent(&self) -> Option<Element<'a>> {
        self.scope.as_deref().cloned()
    }

    // Specified value on this element: !important style, style, then attribute.
    pub fn own_property(&self, name: &str) -> Option<&'a str> {
        let style = self.data().2;
        style
            .iter()
            .rev()
            .find(|(k, _, important)| *important && k == name)
            .or_else(|| style.iter().rev().find(|(k, _, _)| k == name))
            .map(|(_, v, _)| v.as_str())
            .or_else(|| self.attr(name))
            .map(str::trim)
    }

    /// Computed property value, inheriting through the render parent chain.
    pub fn property(&self, name: &str) -> Option<&'a str> {
        match self.own_property(name) {
            Some("inherit") => self.parent().and_then(|p| p.property(name)),
            Some(value) => Some(value),
            None if is_inherited(name) => self.parent().and_then(|p| p.property(name)),
            None => None,
        }
    }

    pub fn property_or(&self, name: &str, default: &'a str) -> &'a str {
        self.property(name).unwrap_or(default)
    }

    pub fn children(&self) -> Vec<Element<'a>> {
        let scope = Rc::new(self.clone());
        self.doc
            .children_of(self.id)
            .iter()
            .filter(|id| matches!(self.doc.nodes[**id].data, NodeData::Element { .. }))
            .map(|id| Element {
                doc: self.doc,
                id: *id,
                scope: Some(scope.clone()),
            })
            .collect()
    }

    pub fn content(&self) -> Vec<Content<'a>> {
        let scope = Rc::new(self.clone());
        self.doc
            .children_of(self.id)
            .iter()
            .map(|id| match &self.doc.nodes[*id].data {
                NodeData::Text(text) => Content::Text(text.as_str()),
                NodeData::Element { .. } => Content::Element(Element {
                    doc: self.doc,
                    id: *id,
                    scope: Some(scope.clone()),
                }),
            })
            .collect()
    }

    pub fn text_content(&self) -> String {
        self.doc.text_content(self.id)
    }

    /// The same node instantiated under `parent` (used by `<use>`).
    pub fn adopt(&self, parent: &Element<'a>) -> Element<'a> {
        Element {
            doc: self.doc,
            id: self.id,
            scope: Some(Rc::new(parent.clone())),
        }
    }

    pub fn resolve_uri(&self, reference: &str) -> String {
        let reference = reference.trim();
        if reference.starts_with('#') {
            return reference.to_string();
        }
        match self.doc.base() {
            Some(base) if !reference.contains(':') => {
                base.join(reference).to_string_lossy().into_owned()
            }
            _ => reference.to_string(),
        }
    }

    /// Resolves `url(#id)` or a bare `#id` to the referenced element.
    pub fn reference(&self, value: &str) -> Option<Element<'a>> {
        let raw = match parse_url_ref(value) {
            Some((inner, _)) => inner,
            None => value.trim().to_string(),
        };
        let uri = self.resolve_uri(&raw);
        let id = self.doc.node_by_uri(&uri)?;
        self.doc.element(id)
    }

    pub fn href_element(&self) -> Option<Element<'a>> {
        self.href().and_then(|href| self.reference(href))
    }

    pub fn is_ancestor_of(&self, other: NodeId) -> bool {
        let mut cur = Some(other);
        while let Some(id) = cur {
            if id == self.id {
                return true;
            }
            cur = self.doc.parent_of(id);
        }
        false
    }

    pub fn font_size(&self) -> f32 {
        let parent_size = || self.parent().map_or(DEFAULT_FONT_SIZE, |p| p.font_size());
        let Some(value) = self.own_property("font-size") else {
            return parent_size();
        };
        let keyword = match value {
            "inherit" => return parent_size(),
            "xx-small" => Some(9.0),
            "x-small" => Some(10.0),
            "small" => Some(13.0),
            "medium" => Some(16.0),
            "large" => Some(18.0),
            "x-large" => Some(24.0),
            "xx-large" => Some(32.0),
            "smaller" => Some(parent_size() / 1.2),
            "larger" => Some(parent_size() * 1.2),
            _ => None,
        };
        if let Some(size) = keyword {
            return size;
        }
        match Length::parse(value) {
            Some(len) => {
                let parent = parent_size();
                len.to_user(parent, parent).max(0.0)
            }
            None => parent_size(),
        }
    }

    // Width/height percentages resolve against the nearest ancestor viewport.
    pub fn viewport_size(&self) -> (f32, f32) {
        let mut cur = self.parent();
        while let Some(el) = cur {
            if el.tag() == "svg" {
                if let Some(vb) = parse_viewbox(el.attr("viewBox")) {
                    return (vb.width, vb.height);
                }
                let (pw, ph) = el.viewport_size();
                let w = el
                    .length_attr("width")
                    .map_or(pw, |l| l.to_user(el.font_size(), pw));
                let h = el
                    .length_attr("height")
                    .map_or(ph, |l| l.to_user(el.font_size(), ph));
                return (w, h);
            }
            cur = el.parent();
        }
        (300.0, 150.0)
    }

    pub fn length_attr(&self, name: &str) -> Option<Length> {
        self.attr(name).and_then(Length::parse)
    }

    pub fn resolve_length(&self, len: Length, axis: Axis) -> f32 {
        let base = if len.is_percent() {
            let (w, h) = self.viewport_size();
            match axis {
                Axis::X => w,
                Axis::Y => h,
                Axis::Other => libm::sqrtf((w * w + h * h) / 2.0),
            }
        } else {
            0.0
        };
        len.to_user(self.font_size(), base)
    }

    pub fn length(&self, name: &str, axis: Axis, default: f32) -> f32 {
        self.length_attr(name)
            .map_or(default, |len| self.resolve_length(len, axis))
    }

    pub fn property_length(&self, name: &str, axis: Axis) -> Option<f32> {
        let len = Length::parse(self.property(name)?)?;
        Some(self.resolve_length(len, axis))
    }

    pub fn number_property(&self, name: &str) -> Option<f32> {
        let value = self.property(name)?;
        match value.strip_suffix('%') {
            Some(pct) => pct.trim().parse::<f32>().ok().map(|v| v / 100.0),
            None => value.parse::<f32>().ok(),
        }
    }

    pub fn matrix_attr(&self, name: &str) -> Matrix {
        self.attr(name).map_or(Matrix::identity(), parse_transform)
    }

    pub fn transform(&self) -> Matrix {
        self.matrix_attr("transform")
    }

    pub fn view_box(&self) -> Option<Rect> {
        parse_viewbox(self.attr("viewBox"))
    }

    pub fn is_displayed(&self) -> bool {
        self.own_property("display") != Some("none")
    }

    pub fn is_visible(&self) -> bool {
        !matches!(self.property("visibility"), Some("hidden") | Some("collapse"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(svg: &str) -> Document {
        Document::parse(svg).expect("parse svg")
    }

    fn by_id<'a>(d: &'a Document, id: &str) -> Element<'a> {
        d.element(d.node_by_id(id).expect("id")).expect("element")
    }

    #[test]
    fn style_declarations_override_presentation_attributes() {
        let d = doc(r##"<svg xmlns="http://www.w3.org/2000/svg">
            <rect id="r" fill="blue" style="fill: red; stroke: green !important; stroke: black"/>
        </svg>"##);
        let r = by_id(&d, "r");
        assert_eq!(r.property("fill"), Some("red"));
        assert_eq!(r.property("stroke"), Some("green"));
    }

    #[test]
    fn inherited_properties_follow_render_parent() {
        let d = doc(r##"<svg xmlns="http://www.w3.org/2000/svg">
            <g fill="red" opacity="0.5"><rect id="r"/></g>
            <g id="host" fill="blue"/>
        </svg>"##);
        let r = by_id(&d, "r");
        assert_eq!(r.property("fill"), Some("red"));
        assert_eq!(r.property("opacity"), None);
        let host = by_id(&d, "host");
        assert_eq!(r.adopt(&host).property("fill"), Some("blue"));
    }

    #[test]
    fn inherit_keyword_defers_for_non_inherited_properties() {
        let d = doc(r##"<svg xmlns="http://www.w3.org/2000/svg">
            <g opacity="0.5"><rect id="r" opacity="inherit"/></g>
        </svg>"##);
        assert_eq!(by_id(&d, "r").property("opacity"), Some("0.5"));
    }

    #[test]
    fn xlink_href_and_xml_space_keep_prefixes() {
        let d = doc(r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">
            <rect id="a" width="1" height="1"/>
            <use id="u" xlink:href="#a"/>
            <text id="t" xml:space="preserve">a  b</text>
        </svg>"##);
        let u = by_id(&d, "u");
        assert_eq!(u.href(), Some("#a"));
        assert_eq!(u.href_element().map(|e| e.tag()), Some("rect"));
        assert_eq!(by_id(&d, "t").attr("xml:space"), Some("preserve"));
        assert_eq!(by_id(&d, "t").text_content(), "a  b");
    }

    #[test]
    fn duplicate_ids_resolve_to_first_definition() {
        let d = doc(r##"<svg xmlns="http://www.w3.org/2000/svg">
            <rect id="dup" width="1"/><circle id="dup"/>
        </svg>"##);
        assert_eq!(by_id(&d, "dup").tag(), "rect");
        assert!(d.root().reference("url(#missing)").is_none());
    }

    #[test]
    fn lengths_resolve_percentages_against_viewport() {
        let d = doc(r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="100" viewBox="0 0 400 200">
            <g font-size="20"><rect id="r" x="50%" y="10%" width="2em"/></g>
        </svg>"##);
        let r = by_id(&d, "r");
        assert_eq!(r.length("x", Axis::X, 0.0), 200.0);
        assert_eq!(r.length("y", Axis::Y, 0.0), 20.0);
        assert_eq!(r.length("width", Axis::X, 0.0), 40.0);
        assert_eq!(r.length("height", Axis::Y, 7.0), 7.0);
    }

    #[test]
    fn rendering_hint_classifies_by_tag() {
        assert_eq!(RenderingHint::for_tag("polygon"), RenderingHint::Shape);
        assert_eq!(RenderingHint::for_tag("clipPath"), RenderingHint::Clipping);
        assert_eq!(RenderingHint::for_tag("mask"), RenderingHint::Masking);
        assert_eq!(RenderingHint::for_tag("g"), RenderingHint::Containment);
        assert_eq!(RenderingHint::for_tag("foreignObject"), RenderingHint::None);
    }

    #[test]
    fn non_svg_root_is_rejected() {
        assert!(matches!(
            Document::parse("<html/>"),
            Err(RenderError::Parse(_))
        ));
    }
}
