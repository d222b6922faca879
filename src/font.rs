use crate::error::RenderError;
use crate::path::Path;
use crate::types::{Matrix, Point};
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::HashMap;
use std::fs;
use std::path::Path as FsPath;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use ttf_parser::{GlyphId, OutlineBuilder};

const MAX_SCAN_DEPTH: usize = 6;
const SYNTHETIC_OBLIQUE_DEG: f32 = -12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericFamily {
    Serif,
    SansSerif,
    Monospace,
}

impl GenericFamily {
    pub fn from_keyword(value: &str) -> Option<GenericFamily> {
        match value {
            "serif" => Some(GenericFamily::Serif),
            "sans-serif" => Some(GenericFamily::SansSerif),
            "monospace" => Some(GenericFamily::Monospace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontStyle {
    Normal,
    Italic,
    Oblique,
}

/// A fully resolved font request for one text run.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    pub family: String,
    pub size: f32,
    pub weight: u16,
    pub style: FontStyle,
    /// OS/2 width class, 1 (ultra-condensed) to 9 (ultra-expanded).
    pub stretch: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunLayout {
    pub vertical: bool,
    pub rtl: bool,
}

/// Outline of a shaped run. The origin is the start of the baseline and y grows
/// downward; `advance` is measured along the run.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedText {
    pub path: Path,
    pub advance: f32,
    pub ascent: f32,
    pub descent: f32,
}

/// Font backend used by the text layout engine.
pub trait TextShaper: Send + Sync {
    /// Whether `family` names an installed family (case-insensitive).
    fn has_family(&self, family: &str) -> bool;

    fn shape(&self, font: &FontSpec, text: &str, layout: RunLayout) -> Option<ShapedText>;
}

/// Families the generic keywords and the last-resort fallback map to.
#[derive(Debug, Clone, PartialEq)]
pub struct FontConfig {
    pub serif: String,
    pub sans_serif: String,
    pub monospace: String,
    pub default_family: String,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            serif: "Times New Roman".to_string(),
            sans_serif: "Arial".to_string(),
            monospace: "Courier New".to_string(),
            default_family: "Arial".to_string(),
        }
    }
}

impl FontConfig {
    pub fn generic(&self, family: GenericFamily) -> &str {
        match family {
            GenericFamily::Serif => &self.serif,
            GenericFamily::SansSerif => &self.sans_serif,
            GenericFamily::Monospace => &self.monospace,
        }
    }

    pub(crate) fn set_generic(&mut self, family: GenericFamily, name: String) {
        match family {
            GenericFamily::Serif => self.serif = name,
            GenericFamily::SansSerif => self.sans_serif = name,
            GenericFamily::Monospace => self.monospace = name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFamily {
    pub name: String,
    /// True when no candidate matched and the default family was used.
    pub fallback: bool,
}

/// Picks the first `font-family` candidate the shaper knows about.
pub fn resolve_family(value: &str, shaper: &dyn TextShaper, config: &FontConfig) -> ResolvedFamily {
    for raw in value.split(',') {
        let candidate = raw.trim().trim_matches('"').trim_matches('\'').trim();
        if candidate.is_empty() {
            continue;
        }
        if let Some(generic) = GenericFamily::from_keyword(candidate) {
            return ResolvedFamily {
                name: config.generic(generic).to_string(),
                fallback: false,
            };
        }
        if let Some(name) = lookup_installed(candidate, shaper) {
            return ResolvedFamily {
                name,
                fallback: false,
            };
        }
    }
    ResolvedFamily {
        name: config.default_family.clone(),
        fallback: true,
    }
}

fn lookup_installed(candidate: &str, shaper: &dyn TextShaper) -> Option<String> {
    if shaper.has_family(candidate) {
        return Some(candidate.to_string());
    }
    let spaced = candidate.replace('-', " ");
    if spaced != candidate && shaper.has_family(&spaced) {
        return Some(spaced);
    }
    let split = split_camel_case(&spaced);
    if split != spaced && shaper.has_family(&split) {
        return Some(split);
    }
    None
}

// "TimesNewRoman" -> "Times New Roman", "XMLSans" -> "XML Sans".
pub(crate) fn split_camel_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &ch) in chars.iter().enumerate() {
        if i > 0 && ch.is_uppercase() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
            if prev.is_lowercase() || (prev.is_uppercase() && next_lower) {
                out.push(' ');
            }
        }
        out.push(ch);
    }
    out
}

/// Document-level "fonts loaded" signal. Text layout blocks on it.
#[derive(Clone)]
pub struct FontGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for FontGate {
    fn default() -> Self {
        Self {
            inner: Arc::new((Mutex::new(true), Condvar::new())),
        }
    }
}

impl std::fmt::Debug for FontGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontGate")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl FontGate {
    /// A gate that stays closed until `signal_ready` is called.
    pub fn pending() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn signal_ready(&self) {
        let (lock, cvar) = &*self.inner;
        let mut ready = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *ready = true;
        cvar.notify_all();
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut ready = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*ready {
            ready = cvar.wait(ready).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[derive(Debug)]
pub(crate) struct RegisteredFont {
    name: String,
    data: Arc<Vec<u8>>,
    weight: u16,
    italic: bool,
    stretch: u16,
}

/// Font faces loaded from disk or memory, indexed by family and face names.
#[derive(Debug, Default)]
pub struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    families: HashMap<String, Vec<usize>>,
    lookup: HashMap<String, usize>,
}

impl FontRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    pub fn register_system_fonts(&mut self) {
        for dir in system_font_dirs() {
            self.register_dir(dir);
        }
        tracing::debug!(faces = self.fonts.len(), "system fonts registered");
    }

    pub fn register_dir(&mut self, path: impl AsRef<FsPath>) {
        self.scan_dir(path.as_ref(), 0);
    }

    fn scan_dir(&mut self, path: &FsPath, depth: usize) {
        if depth > MAX_SCAN_DEPTH {
            return;
        }
        let Ok(entries) = fs::read_dir(path) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.scan_dir(&path, depth + 1);
            } else if path.is_file() {
                self.register_file(path);
            }
        }
    }

    pub fn register_file(&mut self, path: impl AsRef<FsPath>) {
        let path = path.as_ref();
        let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
            return;
        };
        let ext = ext.to_ascii_lowercase();
        if ext != "ttf" && ext != "otf" {
            return;
        }
        let Ok(data) = fs::read(path) else {
            return;
        };
        if let Err(err) = self.insert(data, path) {
            tracing::debug!(path = %path.display(), %err, "skipping font file");
        }
    }

    pub fn register_bytes(
        &mut self,
        data: Vec<u8>,
        source_name: Option<&str>,
    ) -> Result<String, RenderError> {
        let source = source_name.unwrap_or("EmbeddedFont");
        self.insert(data, FsPath::new(source))
    }

    fn insert(&mut self, data: Vec<u8>, path: &FsPath) -> Result<String, RenderError> {
        let face = ttf_parser::Face::parse(&data, 0).map_err(|_| {
            RenderError::InvalidConfiguration(format!(
                "invalid font data for {}",
                path.display()
            ))
        })?;
        let (name, family, aliases) = font_names(&face, path);
        let weight = face.weight().to_number();
        let italic = face.is_italic() || face.is_oblique();
        let stretch = face.width().to_number();

        let index = self.fonts.len();
        self.fonts.push(RegisteredFont {
            name: name.clone(),
            data: Arc::new(data),
            weight,
            italic,
            stretch,
        });
        self.families
            .entry(normalize_name(&family))
            .or_default()
            .push(index);

        let mut all_aliases = vec![name.clone()];
        all_aliases.extend(aliases);
        for alias in all_aliases {
            let key = normalize_name(&alias);
            if key.is_empty() || self.lookup.contains_key(&key) {
                continue;
            }
            self.lookup.insert(key, index);
        }
        Ok(name)
    }

    // Family faces are ranked by style, then stretch, then weight distance. A
    // family nothing answers to ends on the closest registered face.
    pub(crate) fn resolve(&self, font: &FontSpec) -> Option<&RegisteredFont> {
        let key = normalize_name(&font.family);
        if let Some(indices) = self.families.get(&key) {
            return closest_face(indices.iter().filter_map(|i| self.fonts.get(*i)), font);
        }
        if let Some(found) = self.lookup.get(&key).and_then(|i| self.fonts.get(*i)) {
            return Some(found);
        }
        let last_resort = closest_face(self.fonts.iter(), font)?;
        tracing::debug!(
            family = font.family.as_str(),
            face = last_resort.name.as_str(),
            "using last-resort face"
        );
        Some(last_resort)
    }
}

fn closest_face<'f>(
    faces: impl Iterator<Item = &'f RegisteredFont>,
    font: &FontSpec,
) -> Option<&'f RegisteredFont> {
    let want_italic = font.style != FontStyle::Normal;
    faces.min_by_key(|f| {
        let style = if f.italic == want_italic { 0 } else { 10_000 };
        let stretch = (f.stretch as i32 - font.stretch as i32).unsigned_abs() * 1000;
        style + stretch + (f.weight as i32 - font.weight as i32).unsigned_abs()
    })
}

impl TextShaper for FontRegistry {
    fn has_family(&self, family: &str) -> bool {
        let key = normalize_name(family);
        self.families.contains_key(&key) || self.lookup.contains_key(&key)
    }

    fn shape(&self, font: &FontSpec, text: &str, layout: RunLayout) -> Option<ShapedText> {
        let face_entry = self.resolve(font)?;
        tracing::trace!(face = face_entry.name.as_str(), size = font.size, "shaping run");
        let mut shaped = shape_with_face(&face_entry.data, font.size, text, layout)?;
        if font.style != FontStyle::Normal && !face_entry.italic {
            shaped.path = shaped.path.transform(Matrix::skew_x(SYNTHETIC_OBLIQUE_DEG));
        }
        Some(shaped)
    }
}

fn shape_with_face(data: &[u8], size: f32, text: &str, layout: RunLayout) -> Option<ShapedText> {
    let hb_face = HbFace::from_slice(data, 0)?;
    let outline_face = ttf_parser::Face::parse(data, 0).ok()?;
    let units = hb_face.units_per_em().max(1) as f32;
    let scale = size / units;

    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(if layout.rtl {
        HbDirection::RightToLeft
    } else {
        detect_direction(text)
    });
    buffer.push_str(text);
    let output = rustybuzz::shape(&hb_face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.len() != positions.len() {
        return None;
    }

    let ascent = outline_face.ascender() as f32 * scale;
    let descent = -(outline_face.descender() as f32) * scale;
    let mut path = Path::new();
    let mut pen_x = 0.0f32;
    let mut pen_y = 0.0f32;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let advance = pos.x_advance as f32 * scale;
        let (origin_x, origin_y) = if layout.vertical {
            (-advance / 2.0, pen_y + ascent)
        } else {
            (
                pen_x + pos.x_offset as f32 * scale,
                pen_y - pos.y_offset as f32 * scale,
            )
        };
        let mut builder = GlyphPathBuilder::new(origin_x, origin_y, scale);
        if outline_face
            .outline_glyph(GlyphId(info.glyph_id as u16), &mut builder)
            .is_some()
        {
            path.extend(&builder.finish());
        }
        if layout.vertical {
            pen_y += size;
        } else {
            pen_x += advance;
            pen_y -= pos.y_advance as f32 * scale;
        }
    }

    Some(ShapedText {
        path,
        advance: if layout.vertical { pen_y } else { pen_x },
        ascent,
        descent,
    })
}

fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let code = ch as u32;
        let rtl = matches!(
            code,
            0x0590..=0x08FF
                | 0xFB1D..=0xFDFF
                | 0xFE70..=0xFEFF
                | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

// Font units are y-up; the outline is emitted y-down around the glyph origin.
struct GlyphPathBuilder {
    path: Path,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
    current: Point,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            path: Path::new(),
            origin_x,
            origin_y,
            scale,
            current: Point::default(),
        }
    }

    fn map(&self, x: f32, y: f32) -> Point {
        Point::new(self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }

    fn finish(self) -> Path {
        self.path
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let p = self.map(x, y);
        self.path.move_to(p.x, p.y);
        self.current = p;
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let p = self.map(x, y);
        self.path.line_to(p.x, p.y);
        self.current = p;
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let q = self.map(x1, y1);
        let p = self.map(x, y);
        let c = self.current;
        self.path.cubic_to(
            Point::new(c.x + (q.x - c.x) * 2.0 / 3.0, c.y + (q.y - c.y) * 2.0 / 3.0),
            Point::new(p.x + (q.x - p.x) * 2.0 / 3.0, p.y + (q.y - p.y) * 2.0 / 3.0),
            p,
        );
        self.current = p;
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let c1 = self.map(x1, y1);
        let c2 = self.map(x2, y2);
        let p = self.map(x, y);
        self.path.cubic_to(c1, c2, p);
        self.current = p;
    }

    fn close(&mut self) {
        self.path.close();
    }
}

fn system_font_dirs() -> Vec<std::path::PathBuf> {
    let mut dirs = Vec::new();

    #[cfg(target_os = "windows")]
    {
        dirs.push(std::path::PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(std::path::PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(std::path::PathBuf::from("/usr/share/fonts"));
        dirs.push(std::path::PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(std::path::PathBuf::from(home).join(".fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(std::path::PathBuf::from("/System/Library/Fonts"));
        dirs.push(std::path::PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(std::path::PathBuf::from(home).join("Library/Fonts"));
        }
    }

    if let Ok(extra) = std::env::var("SVGRASTER_FONT_DIR") {
        for path in std::env::split_paths(&extra) {
            if !path.as_os_str().is_empty() {
                dirs.push(path);
            }
        }
    }

    dirs
}

// (primary name, family name, aliases)
fn font_names(face: &ttf_parser::Face<'_>, path: &FsPath) -> (String, String, Vec<String>) {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;

    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                if family.is_none() {
                    family = Some(name);
                }
            }
            name_id::FULL_NAME => {
                if full.is_none() {
                    full = Some(name);
                }
            }
            name_id::POST_SCRIPT_NAME => {
                if post.is_none() {
                    post = Some(name);
                }
            }
            _ => {}
        }
    }

    let stem = path
        .file_stem()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string());
    let primary = post
        .clone()
        .or_else(|| full.clone())
        .or_else(|| family.clone())
        .or_else(|| stem.clone())
        .unwrap_or_else(|| "EmbeddedFont".to_string());
    let family_name = family.clone().unwrap_or_else(|| primary.clone());

    let mut aliases = Vec::new();
    for candidate in [family, full, post, stem].into_iter().flatten() {
        if candidate != primary {
            aliases.push(candidate);
        }
    }

    (primary, family_name, aliases)
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

/// Test shaper: every character is a box `size / 2` wide spanning the ascent.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct BoxShaper {
    pub(crate) families: Vec<String>,
}

#[cfg(test)]
impl BoxShaper {
    pub(crate) fn with_families(families: &[&str]) -> Self {
        Self {
            families: families.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[cfg(test)]
impl TextShaper for BoxShaper {
    fn has_family(&self, family: &str) -> bool {
        self.families.iter().any(|f| f.eq_ignore_ascii_case(family))
    }

    fn shape(&self, font: &FontSpec, text: &str, layout: RunLayout) -> Option<ShapedText> {
        let ascent = font.size * 0.8;
        let descent = font.size * 0.2;
        let width = font.size / 2.0;
        let mut path = Path::new();
        let mut pen = 0.0f32;
        for ch in text.chars() {
            if !ch.is_whitespace() {
                let rect = if layout.vertical {
                    crate::types::Rect::new(-width / 2.0, pen, width, font.size)
                } else {
                    crate::types::Rect::new(pen, -ascent, width, ascent)
                };
                path.extend(&Path::rect(rect));
            }
            pen += if layout.vertical { font.size } else { width };
        }
        Some(ShapedText {
            path,
            advance: pen,
            ascent,
            descent,
        })
    }
}

/// An installed sans face other than the default family, for tests that need
/// real outlines. `None` on hosts without one.
#[cfg(test)]
pub(crate) fn installed_sans_face() -> Option<std::path::PathBuf> {
    let names = ["DejaVuSans.ttf", "LiberationSans-Regular.ttf", "NotoSans-Regular.ttf"];
    let roots = [
        "/usr/share/fonts",
        "/usr/local/share/fonts",
        "/System/Library/Fonts",
        "/Library/Fonts",
        r"C:\Windows\Fonts",
    ];
    fn find(dir: &FsPath, names: &[&str], depth: usize) -> Option<std::path::PathBuf> {
        if depth > MAX_SCAN_DEPTH {
            return None;
        }
        for entry in fs::read_dir(dir).ok()?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if let Some(found) = find(&path, names, depth + 1) {
                    return Some(found);
                }
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| names.contains(&n))
            {
                return Some(path);
            }
        }
        None
    }
    roots
        .iter()
        .find_map(|root| find(FsPath::new(root), &names, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn camel_case_boundaries_are_split() {
        assert_eq!(split_camel_case("TimesNewRoman"), "Times New Roman");
        assert_eq!(split_camel_case("XMLSans"), "XML Sans");
        assert_eq!(split_camel_case("Arial"), "Arial");
    }

    #[test]
    fn family_candidates_are_tried_in_order() {
        let shaper = BoxShaper::with_families(&["DejaVu Sans", "Times New Roman"]);
        let config = FontConfig::default();
        let resolved = resolve_family("'Missing Face', dejavu-sans, serif", &shaper, &config);
        assert_eq!(
            resolved,
            ResolvedFamily {
                name: "dejavu sans".to_string(),
                fallback: false
            }
        );
        let resolved = resolve_family("TimesNewRoman", &shaper, &config);
        assert_eq!(resolved.name, "Times New Roman");
    }

    #[test]
    fn generic_keywords_use_configured_families() {
        let shaper = BoxShaper::default();
        let mut config = FontConfig::default();
        config.set_generic(GenericFamily::Monospace, "Fira Mono".to_string());
        assert_eq!(resolve_family("monospace", &shaper, &config).name, "Fira Mono");
        assert_eq!(resolve_family("serif", &shaper, &config).name, "Times New Roman");
    }

    #[test]
    fn unknown_families_fall_back_to_default() {
        let shaper = BoxShaper::default();
        let resolved = resolve_family("Nope, AlsoNope", &shaper, &FontConfig::default());
        assert!(resolved.fallback);
        assert_eq!(resolved.name, "Arial");
    }

    #[test]
    fn font_gate_blocks_until_signalled() {
        let gate = FontGate::pending();
        assert!(!gate.is_ready());
        let signaller = gate.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.signal_ready();
        });
        gate.wait();
        assert!(gate.is_ready());
        handle.join().expect("join");
        assert!(FontGate::default().is_ready());
    }

    #[test]
    fn unknown_family_shapes_with_last_resort_face() {
        let Some(face) = installed_sans_face() else {
            eprintln!("no sans face installed; skipping");
            return;
        };
        let mut registry = FontRegistry::new();
        registry.register_file(&face);
        assert_eq!(registry.len(), 1);
        assert!(!registry.has_family("Arial"));
        let spec = FontSpec {
            family: "Arial".to_string(),
            size: 20.0,
            weight: 400,
            style: FontStyle::Normal,
            stretch: 5,
        };
        let shaped = registry
            .shape(&spec, "Hello", RunLayout::default())
            .expect("shaped");
        assert!(!shaped.path.is_empty());
        assert!(shaped.advance > 0.0);
        assert!(FontRegistry::new().shape(&spec, "Hello", RunLayout::default()).is_none());
    }

    #[test]
    fn invalid_font_bytes_are_rejected() {
        let mut registry = FontRegistry::new();
        let err = registry.register_bytes(vec![0, 1, 2, 3], Some("broken.ttf"));
        assert!(matches!(err, Err(RenderError::InvalidConfiguration(_))));
        assert!(registry.is_empty());
        assert!(!registry.has_family("broken"));
    }
}
