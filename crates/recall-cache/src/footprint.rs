//! Best-effort recursive size estimates for cached values.
//!
//! Estimates use lengths rather than capacities so the same value always
//! reports the same size.

use std::collections::{BTreeMap, HashMap};
use std::mem::size_of;

use recall_core::{Document, MetadataValue, RankedResult};

pub trait MemoryFootprint {
    fn footprint(&self) -> usize;
}

macro_rules! fixed_footprint {
    ($($t:ty),*) => {
        $(impl MemoryFootprint for $t {
            fn footprint(&self) -> usize { size_of::<$t>() }
        })*
    };
}

fixed_footprint!(bool, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64);

impl MemoryFootprint for str {
    fn footprint(&self) -> usize { self.len() }
}

impl MemoryFootprint for String {
    fn footprint(&self) -> usize { size_of::<String>() + self.len() }
}

impl<T: MemoryFootprint> MemoryFootprint for Vec<T> {
    fn footprint(&self) -> usize {
        size_of::<Vec<T>>() + self.iter().map(MemoryFootprint::footprint).sum::<usize>()
    }
}

impl<T: MemoryFootprint> MemoryFootprint for Option<T> {
    fn footprint(&self) -> usize {
        size_of::<Option<T>>() + self.as_ref().map_or(0, MemoryFootprint::footprint)
    }
}

impl<A: MemoryFootprint, B: MemoryFootprint> MemoryFootprint for (A, B) {
    fn footprint(&self) -> usize { self.0.footprint() + self.1.footprint() }
}

impl<K: MemoryFootprint, V: MemoryFootprint> MemoryFootprint for BTreeMap<K, V> {
    fn footprint(&self) -> usize {
        size_of::<BTreeMap<K, V>>() + self.iter().map(|(k, v)| k.footprint() + v.footprint()).sum::<usize>()
    }
}

impl<K: MemoryFootprint, V: MemoryFootprint, S> MemoryFootprint for HashMap<K, V, S> {
    fn footprint(&self) -> usize {
        size_of::<HashMap<K, V, S>>() + self.iter().map(|(k, v)| k.footprint() + v.footprint()).sum::<usize>()
    }
}

impl MemoryFootprint for MetadataValue {
    fn footprint(&self) -> usize {
        match self {
            MetadataValue::Text(s) => size_of::<MetadataValue>() + s.len(),
            _ => size_of::<MetadataValue>(),
        }
    }
}

impl MemoryFootprint for Document {
    fn footprint(&self) -> usize {
        self.id.footprint() + self.content.footprint() + self.metadata.footprint()
    }
}

impl MemoryFootprint for RankedResult {
    fn footprint(&self) -> usize {
        self.document_id.footprint()
            + self.content.footprint()
            + self.metadata.footprint()
            + 3 * size_of::<f32>()
    }
}
