use geo::{BoundingRect, Rect};
use rstar::{RTree, RTreeObject, AABB};

// Wrapper for RTree indexing
struct Envelope {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for Envelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

fn aabb(rect: Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

/// Bounding-box index over a slice of geometries, addressed by slice position.
pub struct EnvelopeIndex {
    tree: RTree<Envelope>,
}

impl EnvelopeIndex {
    pub fn build<'a, G, I>(geometries: I) -> Self
    where
        G: BoundingRect<f64> + 'a,
        I: IntoIterator<Item = &'a G>,
        G::Output: Into<Option<Rect<f64>>>,
    {
        let items: Vec<Envelope> = geometries
            .into_iter()
            .enumerate()
            .filter_map(|(index, g)| {
                let rect: Option<Rect<f64>> = g.bounding_rect().into();
                rect.map(|r| Envelope { index, aabb: aabb(r) })
            })
            .collect();
        Self { tree: RTree::bulk_load(items) }
    }

    /// Positions whose envelope overlaps `rect`, in ascending order.
    pub fn candidates(&self, rect: Rect<f64>) -> Vec<usize> {
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&aabb(rect))
            .map(|e| e.index)
            .collect();
        hits.sort_unstable();
        hits
    }
}
