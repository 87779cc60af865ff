// Selective search region proposals.
//
// 1. Felzenszwalb-Huttenlocher graph segmentation on the smoothed image
//    (8-connected grid, RGB euclidean edge weights, threshold k / |C|).
// 2. Hierarchical grouping: neighbouring regions are merged greedily by
//    colour histogram, size and fill similarity until one region is left.
// Every initial region and every merge yields one proposal.

use std::collections::{BTreeMap, BTreeSet};

use image::{imageops, RgbImage};

use crate::error::Result;
use crate::rcnn::bbox::Rect;

const HIST_BINS: usize = 25;

/// RegionProposer produces candidate rects in the pixel frame of `img`.
pub trait RegionProposer {
    fn propose(&self, img: &RgbImage) -> Result<Vec<Rect>>;
}

#[derive(Debug, Clone)]
pub struct SelectiveSearch {
    scale: f32,
    sigma: f32,
    min_size: usize,
}

impl SelectiveSearch {
    /// new creates a proposer. `scale` is the segmentation threshold k
    /// (larger means larger segments), `sigma` the width of the Gaussian
    /// pre-smoothing and `min_size` the smallest segment kept.
    pub fn new(scale: f32, sigma: f32, min_size: usize) -> Self {
        SelectiveSearch {
            scale,
            sigma,
            min_size,
        }
    }
}

impl RegionProposer for SelectiveSearch {
    fn propose(&self, img: &RgbImage) -> Result<Vec<Rect>> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Ok(vec![]);
        }

        let smoothed = if self.sigma > 0.0 {
            imageops::blur(img, self.sigma)
        } else {
            img.clone()
        };
        let labels = felzenszwalb(&smoothed, self.scale, self.min_size);
        let mut regions = extract_regions(img, &labels);
        let neighbours = find_neighbours(&labels, width as usize, height as usize);

        let mut rects: Vec<Rect> = regions.iter().map(Region::rect).collect();
        let merged = hierarchical_grouping(&mut regions, neighbours, (width * height) as f32);
        rects.extend(merged);
        Ok(rects)
    }
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
            rank: vec![0; n],
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// join merges two roots and returns the new root.
    fn join(&mut self, a: usize, b: usize) -> usize {
        let (root, child) = if self.rank[a] >= self.rank[b] { (a, b) } else { (b, a) };
        if self.rank[a] == self.rank[b] {
            self.rank[root] += 1;
        }
        self.parent[child] = root;
        self.size[root] += self.size[child];
        root
    }
}

fn pixel_distance(img: &RgbImage, a: (u32, u32), b: (u32, u32)) -> f32 {
    let pa = img.get_pixel(a.0, a.1);
    let pb = img.get_pixel(b.0, b.1);
    (0..3)
        .map(|c| {
            let d = pa[c] as f32 - pb[c] as f32;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// felzenszwalb returns a dense component label (0..n) for every pixel in
/// row-major order.
fn felzenszwalb(img: &RgbImage, k: f32, min_size: usize) -> Vec<usize> {
    let (width, height) = img.dimensions();
    let idx = |x: u32, y: u32| (y * width + x) as usize;

    let mut edges: Vec<(f32, usize, usize)> = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            if x + 1 < width {
                edges.push((pixel_distance(img, (x, y), (x + 1, y)), idx(x, y), idx(x + 1, y)));
            }
            if y + 1 < height {
                edges.push((pixel_distance(img, (x, y), (x, y + 1)), idx(x, y), idx(x, y + 1)));
                if x + 1 < width {
                    edges.push((pixel_distance(img, (x, y), (x + 1, y + 1)), idx(x, y), idx(x + 1, y + 1)));
                }
                if x > 0 {
                    edges.push((pixel_distance(img, (x, y), (x - 1, y + 1)), idx(x, y), idx(x - 1, y + 1)));
                }
            }
        }
    }
    edges.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n = (width * height) as usize;
    let mut forest = UnionFind::new(n);
    let mut threshold = vec![k; n];

    for &(w, a, b) in &edges {
        let ra = forest.find(a);
        let rb = forest.find(b);
        if ra != rb && w <= threshold[ra] && w <= threshold[rb] {
            let root = forest.join(ra, rb);
            threshold[root] = w + k / forest.size[root] as f32;
        }
    }

    for &(_, a, b) in &edges {
        let ra = forest.find(a);
        let rb = forest.find(b);
        if ra != rb && (forest.size[ra] < min_size || forest.size[rb] < min_size) {
            forest.join(ra, rb);
        }
    }

    let mut dense: BTreeMap<usize, usize> = BTreeMap::new();
    let mut labels = Vec::with_capacity(n);
    for p in 0..n {
        let root = forest.find(p);
        let next = dense.len();
        labels.push(*dense.entry(root).or_insert(next));
    }
    labels
}

#[derive(Debug, Clone)]
struct Region {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    size: usize,
    hist: Vec<f32>,
}

impl Region {
    fn rect(&self) -> Rect {
        Rect::new(
            self.min_x as f32,
            self.min_y as f32,
            self.max_x as f32,
            self.max_y as f32,
        )
    }

    fn bbox_size(&self) -> f32 {
        ((self.max_x - self.min_x + 1) * (self.max_y - self.min_y + 1)) as f32
    }

    fn merge(&self, other: &Region) -> Region {
        let total = (self.size + other.size) as f32;
        let hist = self
            .hist
            .iter()
            .zip(other.hist.iter())
            .map(|(a, b)| (a * self.size as f32 + b * other.size as f32) / total)
            .collect();
        Region {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
            size: self.size + other.size,
            hist,
        }
    }
}

fn extract_regions(img: &RgbImage, labels: &[usize]) -> Vec<Region> {
    let width = img.width();
    let count = labels.iter().copied().max().map_or(0, |m| m + 1);
    let mut regions: Vec<Region> = (0..count)
        .map(|_| Region {
            min_x: u32::MAX,
            min_y: u32::MAX,
            max_x: 0,
            max_y: 0,
            size: 0,
            hist: vec![0.0; 3 * HIST_BINS],
        })
        .collect();

    for (p, &label) in labels.iter().enumerate() {
        let x = p as u32 % width;
        let y = p as u32 / width;
        let region = &mut regions[label];
        region.min_x = region.min_x.min(x);
        region.min_y = region.min_y.min(y);
        region.max_x = region.max_x.max(x);
        region.max_y = region.max_y.max(y);
        region.size += 1;
        let pixel = img.get_pixel(x, y);
        for c in 0..3 {
            let bin = pixel[c] as usize * HIST_BINS / 256;
            region.hist[c * HIST_BINS + bin] += 1.0;
        }
    }

    for region in regions.iter_mut() {
        let total: f32 = region.hist.iter().sum();
        if total > 0.0 {
            region.hist.iter_mut().for_each(|v| *v /= total);
        }
    }
    regions
}

fn find_neighbours(labels: &[usize], width: usize, height: usize) -> BTreeSet<(usize, usize)> {
    let mut pairs = BTreeSet::new();
    for y in 0..height {
        for x in 0..width {
            let a = labels[y * width + x];
            if x + 1 < width {
                let b = labels[y * width + x + 1];
                if a != b {
                    pairs.insert((a.min(b), a.max(b)));
                }
            }
            if y + 1 < height {
                let b = labels[(y + 1) * width + x];
                if a != b {
                    pairs.insert((a.min(b), a.max(b)));
                }
            }
        }
    }
    pairs
}

fn similarity(a: &Region, b: &Region, img_size: f32) -> f32 {
    let colour: f32 = a.hist.iter().zip(b.hist.iter()).map(|(x, y)| x.min(*y)).sum();
    let size = 1.0 - (a.size + b.size) as f32 / img_size;
    let merged_bbox = a.merge(b).bbox_size();
    let fill = 1.0 - (merged_bbox - a.size as f32 - b.size as f32) / img_size;
    colour + size + fill
}

/// hierarchical_grouping merges the most similar neighbouring pair until no
/// pair is left and returns the rect of every merged region.
fn hierarchical_grouping(
    regions: &mut Vec<Region>,
    neighbours: BTreeSet<(usize, usize)>,
    img_size: f32,
) -> Vec<Rect> {
    let mut similarities: BTreeMap<(usize, usize), f32> = neighbours
        .into_iter()
        .map(|(a, b)| ((a, b), similarity(&regions[a], &regions[b], img_size)))
        .collect();
    let mut merged = Vec::new();

    loop {
        let mut best: Option<((usize, usize), f32)> = None;
        for (&pair, &sim) in &similarities {
            if best.map_or(true, |(_, s)| sim > s) {
                best = Some((pair, sim));
            }
        }
        let (i, j) = match best {
            Some((pair, _)) => pair,
            None => break,
        };

        let t = regions.len();
        let region = regions[i].merge(&regions[j]);
        merged.push(region.rect());
        regions.push(region);

        let touched: Vec<(usize, usize)> = similarities
            .keys()
            .filter(|(a, b)| *a == i || *b == i || *a == j || *b == j)
            .copied()
            .collect();
        let mut new_neighbours = BTreeSet::new();
        for (a, b) in touched {
            similarities.remove(&(a, b));
            let other = if a == i || a == j { b } else { a };
            if other != i && other != j {
                new_neighbours.insert(other);
            }
        }
        for n in new_neighbours {
            let sim = similarity(&regions[t], &regions[n], img_size);
            similarities.insert((n.min(t), n.max(t)), sim);
        }
    }
    merged
}
