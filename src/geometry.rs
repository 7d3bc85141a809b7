//! Bounding geometry: per-state collision boxes, ray tests and an LRU cache
//! in front of the read-only box dataset.

use crate::error::Result;
use crate::types::{BlockFace, BlockState, Position, Vec3};
use indexmap::IndexMap;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_CACHE_CAPACITY: usize = 500;

// ---------------------------------------------------------------------------
// BoundingBox
// ---------------------------------------------------------------------------

/// Axis-aligned box in world (or block-local) space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

/// Where a ray first meets a box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    pub face: BlockFace,
    pub distance: f64,
}

impl BoundingBox {
    /// Builds a box from two opposite corners in any order.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: Vec3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Vec3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// The full unit cube occupying `pos`.
    pub fn unit_at(pos: &Position) -> Self {
        let corner = pos.corner();
        Self::new(corner, corner.add(Vec3::new(1.0, 1.0, 1.0)))
    }

    /// Strict overlap; boxes that only share a face do not overlap.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn shift(&self, offset: Vec3) -> Self {
        Self {
            min: self.min.add(offset),
            max: self.max.add(offset),
        }
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Slab test against a ray. A ray starting inside the box reports the
    /// exit face.
    pub fn ray_trace(&self, origin: Vec3, direction: Vec3, max_distance: f64) -> Option<RayHit> {
        let dir = direction.normalized()?;

        let axes = [
            (origin.x, dir.x, self.min.x, self.max.x, BlockFace::West, BlockFace::East),
            (origin.y, dir.y, self.min.y, self.max.y, BlockFace::Down, BlockFace::Up),
            (origin.z, dir.z, self.min.z, self.max.z, BlockFace::North, BlockFace::South),
        ];

        let mut t_near = f64::NEG_INFINITY;
        let mut t_far = f64::INFINITY;
        let mut face_near = None;
        let mut face_far = None;

        for (o, d, lo, hi, low_face, high_face) in axes {
            if d.abs() < f64::EPSILON {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / d;
            let (mut t1, mut t2) = ((lo - o) * inv, (hi - o) * inv);
            let (mut f1, mut f2) = (low_face, high_face);
            if d < 0.0 {
                std::mem::swap(&mut t1, &mut t2);
                std::mem::swap(&mut f1, &mut f2);
            }

            if t1 > t_near {
                t_near = t1;
                face_near = Some(f1);
            }
            if t2 < t_far {
                t_far = t2;
                face_far = Some(f2);
            }
        }

        if t_far < t_near || t_far < 0.0 {
            return None;
        }

        let (distance, face) = if t_near < 0.0 {
            (t_far, face_far?)
        } else {
            (t_near, face_near?)
        };
        if distance > max_distance {
            return None;
        }

        Some(RayHit {
            point: origin.add(dir.scale(distance)),
            face,
            distance,
        })
    }
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Read-only lookup of block-local boxes keyed by encoded block state.
pub trait BoundingBoxSource: Send + Sync {
    fn boxes(&self, key: &str) -> Option<Vec<BoundingBox>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBox {
    min_x: f64,
    min_y: f64,
    min_z: f64,
    max_x: f64,
    max_y: f64,
    max_z: f64,
}

impl From<RawBox> for BoundingBox {
    fn from(raw: RawBox) -> Self {
        BoundingBox::new(
            Vec3::new(raw.min_x, raw.min_y, raw.min_z),
            Vec3::new(raw.max_x, raw.max_y, raw.max_z),
        )
    }
}

/// In-memory dataset in the `{ "<state>": [{minX, ..., maxZ}] }` shape.
#[derive(Debug, Default)]
pub struct JsonBoundingBoxes {
    entries: HashMap<String, Vec<BoundingBox>>,
}

impl JsonBoundingBoxes {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: HashMap<String, Vec<RawBox>> = serde_json::from_str(json)?;
        let entries = raw
            .into_iter()
            .map(|(key, boxes)| (key, boxes.into_iter().map(BoundingBox::from).collect()))
            .collect();
        Ok(Self { entries })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let dataset = Self::from_json_str(&json)?;
        debug!(
            "Loaded {} bounding-box entries from {}",
            dataset.len(),
            path.display()
        );
        Ok(dataset)
    }

    pub fn insert(&mut self, key: impl Into<String>, boxes: Vec<BoundingBox>) {
        self.entries.insert(key.into(), boxes);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BoundingBoxSource for JsonBoundingBoxes {
    fn boxes(&self, key: &str) -> Option<Vec<BoundingBox>> {
        self.entries.get(key).cloned()
    }
}

// ---------------------------------------------------------------------------
// Cached service
// ---------------------------------------------------------------------------

pub struct BoundingGeometry {
    source: Arc<dyn BoundingBoxSource>,
    capacity: usize,
    // Access order: least recently used at index 0.
    cache: Mutex<IndexMap<String, Arc<[BoundingBox]>>>,
}

impl BoundingGeometry {
    pub fn new(source: Arc<dyn BoundingBoxSource>, capacity: usize) -> Self {
        Self {
            source,
            capacity: capacity.max(1),
            cache: Mutex::new(IndexMap::new()),
        }
    }

    /// A service over an empty dataset; every lookup misses.
    pub fn empty() -> Self {
        Self::new(Arc::new(JsonBoundingBoxes::default()), DEFAULT_CACHE_CAPACITY)
    }

    /// Block-local boxes for `state`, or `None` when the dataset has no entry.
    pub fn get_boxes(&self, state: &BlockState) -> Option<Arc<[BoundingBox]>> {
        let key = state.as_str();
        {
            let mut cache = self.cache.lock();
            if let Some(boxes) = cache.shift_remove(key) {
                cache.insert(key.to_string(), boxes.clone());
                return Some(boxes);
            }
        }

        let boxes: Arc<[BoundingBox]> = self.source.boxes(key)?.into();

        let mut cache = self.cache.lock();
        cache.insert(key.to_string(), boxes.clone());
        while cache.len() > self.capacity {
            cache.shift_remove_index(0);
        }
        Some(boxes)
    }

    /// Boxes for `state` translated to the world position `pos`.
    pub fn get_boxes_at(&self, state: &BlockState, pos: &Position) -> Vec<BoundingBox> {
        let offset = pos.corner();
        self.get_boxes(state)
            .map(|boxes| boxes.iter().map(|b| b.shift(offset)).collect())
            .unwrap_or_default()
    }

    /// Closest hit over every box of `state` at `pos`. Ties keep the box
    /// found first.
    pub fn ray_trace(
        &self,
        state: &BlockState,
        pos: &Position,
        origin: Vec3,
        direction: Vec3,
        max_distance: f64,
    ) -> Option<RayHit> {
        let mut closest: Option<RayHit> = None;
        for b in self.get_boxes_at(state, pos) {
            let Some(hit) = b.ray_trace(origin, direction, max_distance) else {
                continue;
            };
            if closest.map_or(true, |c| hit.distance < c.distance) {
                closest = Some(hit);
            }
        }
        closest
    }

    /// Collision boxes of `state` at `pos`, falling back to the boxes of
    /// `fallback` and then to a unit cube when the dataset knows neither.
    pub fn collision_boxes_at(
        &self,
        state: &BlockState,
        pos: &Position,
        fallback: Option<&BlockState>,
    ) -> Vec<BoundingBox> {
        let offset = pos.corner();
        let boxes = self
            .get_boxes(state)
            .or_else(|| fallback.and_then(|f| self.get_boxes(f)));
        match boxes {
            Some(boxes) => boxes.iter().map(|b| b.shift(offset)).collect(),
            None => vec![BoundingBox::unit_at(pos)],
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SLAB_JSON: &str = r#"{
        "minecraft:stone": [{"minX":0,"minY":0,"minZ":0,"maxX":1,"maxY":1,"maxZ":1}],
        "minecraft:oak_slab[type=bottom]": [{"minX":0,"minY":0,"minZ":0,"maxX":1,"maxY":0.5,"maxZ":1}],
        "minecraft:air": []
    }"#;

    struct CountingSource {
        inner: JsonBoundingBoxes,
        hits: AtomicUsize,
    }

    impl BoundingBoxSource for CountingSource {
        fn boxes(&self, key: &str) -> Option<Vec<BoundingBox>> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.inner.boxes(key)
        }
    }

    fn unit() -> BoundingBox {
        BoundingBox::new(Vec3::zero(), Vec3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn ray_hits_near_face() {
        let hit = unit()
            .ray_trace(Vec3::new(-2.0, 0.5, 0.5), Vec3::new(1.0, 0.0, 0.0), 10.0)
            .unwrap();
        assert_eq!(hit.face, BlockFace::West);
        assert!((hit.distance - 2.0).abs() < 1e-9);
        assert!((hit.point.x - 0.0).abs() < 1e-9);
    }

    #[test]
    fn ray_from_above_hits_top() {
        let hit = unit()
            .ray_trace(Vec3::new(0.5, 3.0, 0.5), Vec3::new(0.0, -1.0, 0.0), 10.0)
            .unwrap();
        assert_eq!(hit.face, BlockFace::Up);
    }

    #[test]
    fn ray_misses_and_respects_range() {
        let b = unit();
        assert!(b
            .ray_trace(Vec3::new(-2.0, 2.0, 0.5), Vec3::new(1.0, 0.0, 0.0), 10.0)
            .is_none());
        assert!(b
            .ray_trace(Vec3::new(-2.0, 0.5, 0.5), Vec3::new(1.0, 0.0, 0.0), 1.5)
            .is_none());
        assert!(b
            .ray_trace(Vec3::new(2.0, 0.5, 0.5), Vec3::new(1.0, 0.0, 0.0), 10.0)
            .is_none());
    }

    #[test]
    fn overlap_is_strict() {
        let a = unit();
        let touching = a.shift(Vec3::new(1.0, 0.0, 0.0));
        let crossing = a.shift(Vec3::new(0.5, 0.5, 0.5));
        assert!(!a.overlaps(&touching));
        assert!(a.overlaps(&crossing));
    }

    #[test]
    fn dataset_parses_original_shape() {
        let data = JsonBoundingBoxes::from_json_str(SLAB_JSON).unwrap();
        assert_eq!(data.len(), 3);
        let slab = data.boxes("minecraft:oak_slab[type=bottom]").unwrap();
        assert_eq!(slab[0].max.y, 0.5);
        assert_eq!(data.boxes("minecraft:air").unwrap().len(), 0);
    }

    #[test]
    fn cache_serves_repeat_lookups_and_evicts_lru() {
        let source = Arc::new(CountingSource {
            inner: JsonBoundingBoxes::from_json_str(SLAB_JSON).unwrap(),
            hits: AtomicUsize::new(0),
        });
        let geometry = BoundingGeometry::new(source.clone(), 2);

        let stone = BlockState::new("minecraft:stone");
        let slab = BlockState::new("minecraft:oak_slab[type=bottom]");
        let air = BlockState::air();

        geometry.get_boxes(&stone);
        geometry.get_boxes(&stone);
        assert_eq!(source.hits.load(Ordering::SeqCst), 1);

        geometry.get_boxes(&slab);
        // stone becomes most recent, slab is evicted next
        geometry.get_boxes(&stone);
        geometry.get_boxes(&air);
        assert_eq!(geometry.cached_len(), 2);

        let before = source.hits.load(Ordering::SeqCst);
        geometry.get_boxes(&stone);
        assert_eq!(source.hits.load(Ordering::SeqCst), before);
        geometry.get_boxes(&slab);
        assert_eq!(source.hits.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn boxes_at_translate_and_unknown_is_empty() {
        let geometry = BoundingGeometry::new(
            Arc::new(JsonBoundingBoxes::from_json_str(SLAB_JSON).unwrap()),
            DEFAULT_CACHE_CAPACITY,
        );
        let pos = Position::new("world", 10, 64, -3);
        let boxes = geometry.get_boxes_at(&BlockState::new("minecraft:stone"), &pos);
        assert_eq!(boxes, vec![BoundingBox::unit_at(&pos)]);
        assert!(geometry
            .get_boxes_at(&BlockState::new("minecraft:unknown"), &pos)
            .is_empty());
    }

    #[test]
    fn collision_falls_back_to_true_state_then_unit() {
        let geometry = BoundingGeometry::new(
            Arc::new(JsonBoundingBoxes::from_json_str(SLAB_JSON).unwrap()),
            DEFAULT_CACHE_CAPACITY,
        );
        let pos = Position::new("world", 0, 0, 0);
        let unknown = BlockState::new("minecraft:unknown");
        let slab = BlockState::new("minecraft:oak_slab[type=bottom]");

        let via_fallback = geometry.collision_boxes_at(&unknown, &pos, Some(&slab));
        assert_eq!(via_fallback[0].max.y, 0.5);

        let unit_cube = geometry.collision_boxes_at(&unknown, &pos, None);
        assert_eq!(unit_cube, vec![BoundingBox::unit_at(&pos)]);
    }

    #[test]
    fn state_ray_trace_uses_translated_boxes() {
        let geometry = BoundingGeometry::new(
            Arc::new(JsonBoundingBoxes::from_json_str(SLAB_JSON).unwrap()),
            DEFAULT_CACHE_CAPACITY,
        );
        let pos = Position::new("world", 5, 0, 0);
        let slab = BlockState::new("minecraft:oak_slab[type=bottom]");

        // Passes over the bottom slab.
        assert!(geometry
            .ray_trace(&slab, &pos, Vec3::new(0.0, 0.75, 0.5), Vec3::new(1.0, 0.0, 0.0), 10.0)
            .is_none());
        let hit = geometry
            .ray_trace(&slab, &pos, Vec3::new(0.0, 0.25, 0.5), Vec3::new(1.0, 0.0, 0.0), 10.0)
            .unwrap();
        assert_eq!(hit.face, BlockFace::West);
        assert!((hit.distance - 5.0).abs() < 1e-9);
    }
}
