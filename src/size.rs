//! Size descriptors
//!
//! A [`SizeDescriptor`] answers "how large is this field": in which word space (bits
//! or bytes) it is measured, whether the size is fixed or bounded, and how to compute
//! the concrete size against a live instance.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{Result, StoreError};
use crate::schema::CodecEnv;
use crate::value::Instance;

/// Largest fixed byte size served from the intern table
const INTERNED_MAX_BYTES: u64 = 16;

/// Largest fixed bit size served from the intern table
const INTERNED_MAX_BITS: u64 = 8;

/// Allocation floor used when nothing better is known
const ALLOC_FLOOR: u64 = 32;

/// Unit a size is measured in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WordSpace {
    Bit,
    Byte,
}

impl WordSpace {
    /// Convert `value` measured in `self` into `target`. Bits round up to whole bytes.
    pub fn map_size(self, target: WordSpace, value: u64) -> u64 {
        match (self, target) {
            (WordSpace::Bit, WordSpace::Byte) => value.div_ceil(8),
            (WordSpace::Byte, WordSpace::Bit) => value * 8,
            _ => value,
        }
    }
}

/// Static shape of a size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeShape {
    Fixed(u64),
    Bounded { min: u64, max: Option<u64> },
}

/// Everything a size function may look at
pub struct SizeContext<'a> {
    pub env: &'a CodecEnv<'a>,
    pub instance: &'a Instance,
}

/// Size computation bound to a live instance
pub type SizeFn = Arc<dyn Fn(&SizeContext<'_>) -> Result<u64> + Send + Sync>;

/// How large a field is
#[derive(Clone)]
pub struct SizeDescriptor {
    space: WordSpace,
    shape: SizeShape,
    calc: Option<SizeFn>,
}

impl SizeDescriptor {
    /// Fixed size descriptor. Small sizes come from a shared intern table.
    pub fn fixed(space: WordSpace, size: u64) -> Arc<SizeDescriptor> {
        let (table, limit) = match space {
            WordSpace::Bit => (&BIT_TABLE, INTERNED_MAX_BITS),
            WordSpace::Byte => (&BYTE_TABLE, INTERNED_MAX_BYTES),
        };
        if size <= limit {
            let table = table.get_or_init(|| {
                (0..=limit)
                    .map(|n| Arc::new(SizeDescriptor::new_fixed(space, n)))
                    .collect()
            });
            return Arc::clone(&table[size as usize]);
        }
        Arc::new(SizeDescriptor::new_fixed(space, size))
    }

    /// Size known only at runtime, within `[min, max]`
    pub fn bounded(space: WordSpace, min: u64, max: Option<u64>, calc: SizeFn) -> Arc<SizeDescriptor> {
        Arc::new(SizeDescriptor {
            space,
            shape: SizeShape::Bounded { min, max },
            calc: Some(calc),
        })
    }

    /// Size known only at runtime, without bounds
    pub fn unknown(space: WordSpace, calc: SizeFn) -> Arc<SizeDescriptor> {
        SizeDescriptor::bounded(space, 0, None, calc)
    }

    fn new_fixed(space: WordSpace, size: u64) -> SizeDescriptor {
        SizeDescriptor {
            space,
            shape: SizeShape::Fixed(size),
            calc: None,
        }
    }

    pub fn word_space(&self) -> WordSpace {
        self.space
    }

    pub fn shape(&self) -> SizeShape {
        self.shape
    }

    pub fn has_fixed(&self) -> bool {
        matches!(self.shape, SizeShape::Fixed(_))
    }

    pub fn fixed_size(&self) -> Option<u64> {
        match self.shape {
            SizeShape::Fixed(n) => Some(n),
            SizeShape::Bounded { .. } => None,
        }
    }

    /// Fixed size converted into `space`
    pub fn fixed_in(&self, space: WordSpace) -> Option<u64> {
        self.fixed_size().map(|n| self.space.map_size(space, n))
    }

    pub fn min(&self) -> u64 {
        match self.shape {
            SizeShape::Fixed(n) => n,
            SizeShape::Bounded { min, .. } => min,
        }
    }

    pub fn max(&self) -> Option<u64> {
        match self.shape {
            SizeShape::Fixed(n) => Some(n),
            SizeShape::Bounded { max, .. } => max,
        }
    }

    /// Compute the size of a non-fixed field against a live instance
    pub fn calc_unknown(&self, ctx: &SizeContext<'_>) -> Result<u64> {
        match &self.calc {
            Some(calc) => calc(ctx),
            None => self.fixed_size().ok_or_else(|| StoreError::InvalidSchema {
                schema: ctx.instance.schema().name().to_string(),
                detail: "bounded size without a size function".to_string(),
            }),
        }
    }

    /// Size of the field for `ctx.instance`, in this descriptor's word space
    pub fn size_of(&self, ctx: &SizeContext<'_>) -> Result<u64> {
        match self.shape {
            SizeShape::Fixed(n) => Ok(n),
            SizeShape::Bounded { .. } => self.calc_unknown(ctx),
        }
    }

    /// Size converted into `space`
    pub fn size_in(&self, space: WordSpace, ctx: &SizeContext<'_>) -> Result<u64> {
        Ok(self.space.map_size(space, self.size_of(ctx)?))
    }

    /// Allocation estimate when no instance is at hand
    pub fn calc_alloc_size(&self, space: WordSpace) -> u64 {
        let estimate = match self.shape {
            SizeShape::Fixed(n) => n,
            SizeShape::Bounded { min, max: Some(max) } => min + (max - min) / 2,
            SizeShape::Bounded { min, max: None } => min.max(ALLOC_FLOOR),
        };
        self.space.map_size(space, estimate)
    }
}

impl fmt::Debug for SizeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape {
            SizeShape::Fixed(n) => write!(f, "Fixed({n} {:?})", self.space),
            SizeShape::Bounded { min, max: Some(max) } => {
                write!(f, "Bounded({min}..={max} {:?})", self.space)
            }
            SizeShape::Bounded { min, max: None } => write!(f, "Bounded({min}.. {:?})", self.space),
        }
    }
}

static BIT_TABLE: OnceLock<Vec<Arc<SizeDescriptor>>> = OnceLock::new();
static BYTE_TABLE: OnceLock<Vec<Arc<SizeDescriptor>>> = OnceLock::new();
