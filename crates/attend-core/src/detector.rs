//! Haar cascade face detector.
//!
//! Loads OpenCV cascade classifiers in the `opencv-cascade-classifier` XML
//! format (e.g. `haarcascade_frontalface_default.xml`), scans an image
//! pyramid with a sliding window, and merges overlapping hits the way
//! OpenCV's `groupRectangles` does.

use crate::types::FaceRect;
use image::imageops::FilterType;
use image::GrayImage;
use roxmltree::Node;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// --- Named constants ---
const DEFAULT_SCALE_FACTOR: f64 = 1.1;
const DEFAULT_MIN_NEIGHBORS: u32 = 3;
/// Relative tolerance used when clustering raw window hits.
const GROUP_EPS: f64 = 0.2;
const STAGE_THRESHOLD_EPS: f64 = 1e-5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade file not found: {0}; copy haarcascade_frontalface_default.xml from OpenCV's data/haarcascades")]
    ModelNotFound(String),
    #[error("invalid cascade: {0}")]
    InvalidCascade(String),
    #[error("invalid detection parameters: {0}")]
    InvalidParams(String),
    #[error("cascade XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Multi-scale detection parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Pyramid step between scales; must be greater than 1.
    pub scale_factor: f64,
    /// A face is kept only when more than this many raw hits support it.
    pub min_neighbors: u32,
    /// Smallest window (width, height) considered, in source pixels.
    pub min_size: (u32, u32),
    /// Largest window considered; `None` is unbounded.
    pub max_size: Option<(u32, u32)>,
}

impl DetectParams {
    pub const fn new(scale_factor: f64, min_neighbors: u32) -> Self {
        Self {
            scale_factor,
            min_neighbors,
            min_size: (0, 0),
            max_size: None,
        }
    }
}

impl Default for DetectParams {
    fn default() -> Self {
        Self::new(DEFAULT_SCALE_FACTOR, DEFAULT_MIN_NEIGHBORS)
    }
}

/// Anything that can locate faces in a grayscale image.
pub trait FaceDetector {
    fn detect(&self, image: &GrayImage, params: &DetectParams) -> Result<Vec<FaceRect>, DetectorError>;
}

#[derive(Debug, Clone)]
struct WeightedRect {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    weight: f64,
}

#[derive(Debug, Clone)]
struct Feature {
    rects: Vec<WeightedRect>,
}

impl Feature {
    /// Weighted rectangle sum for the window whose top-left corner is (x, y).
    fn value(&self, ii: &Integral, x: usize, y: usize) -> f64 {
        self.rects
            .iter()
            .map(|r| r.weight * ii.sum(x + r.x, y + r.y, r.width, r.height) as f64)
            .sum()
    }
}

#[derive(Debug, Clone)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

/// One boosted decision tree. Child indices > 0 point at nodes, indices <= 0
/// point at leaf `-idx`.
#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f64>,
}

impl WeakClassifier {
    fn evaluate(&self, mut feature_value: impl FnMut(usize) -> f64) -> f64 {
        let mut idx: i32 = 0;
        loop {
            let node = &self.nodes[idx as usize];
            idx = if feature_value(node.feature) < node.threshold {
                node.left
            } else {
                node.right
            };
            if idx <= 0 {
                break;
            }
        }
        self.leaves[(-idx) as usize]
    }
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

/// Summed-area tables over pixel values and squared pixel values.
struct Integral {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl Integral {
    fn new(image: &GrayImage) -> Self {
        let w = image.width() as usize;
        let h = image.height() as usize;
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];
        let raw = image.as_raw();

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let p = raw[y * w + x] as u64;
                row += p;
                row_sq += p * p;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
                sq_sum[(y + 1) * stride + x + 1] = sq_sum[y * stride + x + 1] + row_sq;
            }
        }

        Self { stride, sum, sq_sum }
    }

    fn rect(&self, table: &[u64], x: usize, y: usize, w: usize, h: usize) -> u64 {
        let s = self.stride;
        (table[(y + h) * s + x + w] + table[y * s + x]) - (table[y * s + x + w] + table[(y + h) * s + x])
    }

    fn sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        self.rect(&self.sum, x, y, w, h)
    }

    fn sq_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        self.rect(&self.sq_sum, x, y, w, h)
    }
}

/// Boosted Haar cascade classifier.
#[derive(Debug, Clone)]
pub struct CascadeDetector {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<Feature>,
}

impl CascadeDetector {
    /// Load a cascade XML file from disk.
    pub fn load(path: &Path) -> Result<Self, DetectorError> {
        if !path.exists() {
            return Err(DetectorError::ModelNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let detector = Self::from_xml(&text)?;

        tracing::info!(
            path = %path.display(),
            window = ?(detector.window_width, detector.window_height),
            stages = detector.stages.len(),
            features = detector.features.len(),
            "loaded Haar cascade"
        );

        Ok(detector)
    }

    /// Parse a cascade from its XML text.
    pub fn from_xml(text: &str) -> Result<Self, DetectorError> {
        let doc = roxmltree::Document::parse(text)?;
        let cascade = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| {
                invalid("no <cascade> element (old-format haar files are not supported)")
            })?;

        let feature_type = child_text(cascade, "featureType")?;
        if !feature_type.eq_ignore_ascii_case("HAAR") {
            return Err(invalid(format!("unsupported feature type {feature_type}")));
        }

        let window_width: u32 = parse_num(child_text(cascade, "width")?, "width")?;
        let window_height: u32 = parse_num(child_text(cascade, "height")?, "height")?;
        if window_width < 3 || window_height < 3 {
            return Err(invalid(format!("window {window_width}x{window_height} too small")));
        }

        let features = items(child(cascade, "features")?)
            .map(|f| parse_feature(f, window_width as usize, window_height as usize))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = items(child(cascade, "stages")?)
            .map(|s| parse_stage(s, features.len()))
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(invalid("cascade has no stages"));
        }

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    /// Run every stage on the window at (x, y); true when all stages pass.
    fn evaluate(&self, ii: &Integral, x: usize, y: usize) -> bool {
        let ww = self.window_width as usize;
        let wh = self.window_height as usize;

        // Variance normalisation over the window minus a 1-pixel border.
        let area = ((ww - 2) * (wh - 2)) as f64;
        let s = ii.sum(x + 1, y + 1, ww - 2, wh - 2) as f64;
        let sq = ii.sq_sum(x + 1, y + 1, ww - 2, wh - 2) as f64;
        let nf = area * sq - s * s;
        let norm = if nf > 0.0 { nf.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let total: f64 = stage
                .classifiers
                .iter()
                .map(|weak| weak.evaluate(|f| self.features[f].value(ii, x, y) / norm))
                .sum();
            if total < stage.threshold - STAGE_THRESHOLD_EPS {
                return false;
            }
        }
        true
    }
}

impl FaceDetector for CascadeDetector {
    /// Detect faces, returned largest first.
    fn detect(&self, image: &GrayImage, params: &DetectParams) -> Result<Vec<FaceRect>, DetectorError> {
        if params.scale_factor <= 1.0 || !params.scale_factor.is_finite() {
            return Err(DetectorError::InvalidParams(format!(
                "scale factor must be > 1, got {}",
                params.scale_factor
            )));
        }

        let (iw, ih) = image.dimensions();
        let (ww, wh) = (self.window_width, self.window_height);
        let mut candidates = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let scaled_w = (iw as f64 / factor).round() as u32;
            let scaled_h = (ih as f64 / factor).round() as u32;
            if scaled_w < ww || scaled_h < wh {
                break;
            }

            let win_w = (ww as f64 * factor).round() as u32;
            let win_h = (wh as f64 * factor).round() as u32;
            if let Some((max_w, max_h)) = params.max_size {
                if win_w > max_w || win_h > max_h {
                    break;
                }
            }

            if win_w >= params.min_size.0 && win_h >= params.min_size.1 {
                let scaled: Cow<'_, GrayImage> = if (scaled_w, scaled_h) == (iw, ih) {
                    Cow::Borrowed(image)
                } else {
                    Cow::Owned(image::imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle))
                };
                let ii = Integral::new(&scaled);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..=(scaled_h - wh) as usize).step_by(step) {
                    for x in (0..=(scaled_w - ww) as usize).step_by(step) {
                        if self.evaluate(&ii, x, y) {
                            candidates.push(FaceRect::new(
                                (x as f64 * factor).round() as u32,
                                (y as f64 * factor).round() as u32,
                                win_w,
                                win_h,
                            ));
                        }
                    }
                }
            }

            factor *= params.scale_factor;
        }

        let raw = candidates.len();
        let mut faces: Vec<FaceRect> = group_rectangles(candidates, params.min_neighbors, GROUP_EPS)
            .into_iter()
            .filter_map(|r| r.clamp_to(iw, ih))
            .collect();
        faces.sort_by(|a, b| b.area().cmp(&a.area()));

        tracing::debug!(raw, faces = faces.len(), "cascade detection");
        Ok(faces)
    }
}

fn invalid(msg: impl Into<String>) -> DetectorError {
    DetectorError::InvalidCascade(msg.into())
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>, DetectorError> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| invalid(format!("missing <{name}>")))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, DetectorError> {
    Ok(child(node, name)?.text().unwrap_or("").trim())
}

/// OpenCV serialises sequences as repeated `<_>` elements.
fn items<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.has_tag_name("_"))
}

fn parse_num<T: FromStr>(token: &str, what: &str) -> Result<T, DetectorError> {
    token
        .parse()
        .map_err(|_| invalid(format!("bad {what} value {token:?}")))
}

fn parse_feature(node: Node<'_, '_>, ww: usize, wh: usize) -> Result<Feature, DetectorError> {
    if let Ok(tilted) = child_text(node, "tilted") {
        if tilted != "0" {
            return Err(invalid("tilted Haar features are not supported"));
        }
    }

    let rects = items(child(node, "rects")?)
        .map(|r| {
            let tokens: Vec<&str> = r.text().unwrap_or("").split_whitespace().collect();
            if tokens.len() != 5 {
                return Err(invalid(format!("rect needs 5 values, got {}", tokens.len())));
            }
            let rect = WeightedRect {
                x: parse_num(tokens[0], "rect x")?,
                y: parse_num(tokens[1], "rect y")?,
                width: parse_num(tokens[2], "rect width")?,
                height: parse_num(tokens[3], "rect height")?,
                weight: parse_num(tokens[4], "rect weight")?,
            };
            if rect.x + rect.width > ww || rect.y + rect.height > wh {
                return Err(invalid("feature rect exceeds detection window"));
            }
            Ok(rect)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Feature { rects })
}

fn parse_stage(node: Node<'_, '_>, feature_count: usize) -> Result<Stage, DetectorError> {
    let threshold = parse_num(child_text(node, "stageThreshold")?, "stageThreshold")?;
    let classifiers = items(child(node, "weakClassifiers")?)
        .map(|w| parse_weak(w, feature_count))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stage {
        threshold,
        classifiers,
    })
}

fn parse_weak(node: Node<'_, '_>, feature_count: usize) -> Result<WeakClassifier, DetectorError> {
    let tokens: Vec<&str> = child_text(node, "internalNodes")?.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() % 4 != 0 {
        return Err(invalid(format!(
            "internalNodes must hold groups of 4 values, got {}",
            tokens.len()
        )));
    }

    let leaves = child_text(node, "leafValues")?
        .split_whitespace()
        .map(|t| parse_num::<f64>(t, "leaf"))
        .collect::<Result<Vec<_>, _>>()?;

    let mut nodes = Vec::with_capacity(tokens.len() / 4);
    for chunk in tokens.chunks(4) {
        nodes.push(TreeNode {
            left: parse_num(chunk[0], "left child")?,
            right: parse_num(chunk[1], "right child")?,
            feature: parse_num(chunk[2], "feature index")?,
            threshold: parse_num(chunk[3], "node threshold")?,
        });
    }

    // Children must point forward and leaves must exist, so evaluation
    // always terminates in bounds.
    for (i, n) in nodes.iter().enumerate() {
        if n.feature >= feature_count {
            return Err(invalid(format!("feature index {} out of range", n.feature)));
        }
        for c in [n.left, n.right] {
            let ok = if c > 0 {
                (c as usize) > i && (c as usize) < nodes.len()
            } else {
                ((-c) as usize) < leaves.len()
            };
            if !ok {
                return Err(invalid(format!("tree child {c} out of range")));
            }
        }
    }

    Ok(WeakClassifier { nodes, leaves })
}

/// Two rectangles are similar when every edge lies within `eps` of the mean
/// smaller side.
fn similar(a: &FaceRect, b: &FaceRect, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

/// Assign each rectangle a dense cluster id using union-find over `similar`.
fn partition(rects: &[FaceRect], eps: f64) -> Vec<usize> {
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let a = find(&mut parent, i);
                let b = find(&mut parent, j);
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    let mut ids: HashMap<usize, usize> = HashMap::new();
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let root = find(&mut parent, i);
        let next = ids.len();
        labels.push(*ids.entry(root).or_insert(next));
    }
    labels
}

/// Cluster raw hits, average each cluster, keep clusters with more than
/// `group_threshold` members, and drop small clusters nested inside a
/// better-supported one.
fn group_rectangles(rects: Vec<FaceRect>, group_threshold: u32, eps: f64) -> Vec<FaceRect> {
    if group_threshold == 0 || rects.is_empty() {
        return rects;
    }

    let labels = partition(&rects, eps);
    let classes = labels.iter().copied().max().map_or(0, |m| m + 1);

    let mut sums = vec![[0u64; 4]; classes];
    let mut counts = vec![0u32; classes];
    for (r, &l) in rects.iter().zip(&labels) {
        sums[l][0] += r.x as u64;
        sums[l][1] += r.y as u64;
        sums[l][2] += r.width as u64;
        sums[l][3] += r.height as u64;
        counts[l] += 1;
    }

    let averaged: Vec<FaceRect> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &c)| {
            let avg = |v: u64| (v as f64 / c as f64).round() as u32;
            FaceRect::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3]))
        })
        .collect();

    let mut out = Vec::new();
    for i in 0..classes {
        let n1 = counts[i];
        if n1 <= group_threshold {
            continue;
        }
        let r1 = averaged[i];

        let nested = (0..classes).any(|j| {
            let n2 = counts[j];
            if j == i || n2 <= group_threshold {
                return false;
            }
            let r2 = averaged[j];
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let (x1, y1, w1, h1) = (r1.x as i64, r1.y as i64, r1.width as i64, r1.height as i64);
            let (x2, y2, w2, h2) = (r2.x as i64, r2.y as i64, r2.width as i64, r2.height as i64);
            x1 >= x2 - dx
                && y1 >= y2 - dy
                && x1 + w1 <= x2 + w2 + dx
                && y1 + h1 <= y2 + h2 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !nested {
            out.push(r1);
        }
    }
    out
}
