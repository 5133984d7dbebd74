//! Element datatypes and their memory layout.
//!
//! This module provides the [`Element`] trait, which maps Rust element types to
//! a [`Datatype`] descriptor, and the descriptor itself. A schedule never looks
//! at element values; it only needs the layout (extent and true bounds) to size
//! scratch buffers.
//!
//! # Built-in Types
//!
//! | Rust Type | Tag       | Extent |
//! |-----------|-----------|--------|
//! | `f32`     | `F32`     | 4      |
//! | `f64`     | `F64`     | 8      |
//! | `i32`     | `I32`     | 4      |
//! | `i64`     | `I64`     | 8      |
//! | `u8`      | `U8`      | 1      |
//! | `u32`     | `U32`     | 4      |
//! | `u64`     | `U64`     | 8      |
//!
//! Other element types (for example `String`) are described as
//! [`DatatypeTag::Derived`] with the size of the Rust type as extent.

use crate::error::{Error, Result};
use crate::scratch::ScratchLayout;

/// Tag identifying the kind of element a [`Datatype`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DatatypeTag {
    /// 32-bit floating point
    F32 = 0,
    /// 64-bit floating point
    F64 = 1,
    /// 32-bit signed integer
    I32 = 2,
    /// 64-bit signed integer
    I64 = 3,
    /// 8-bit unsigned integer
    U8 = 4,
    /// 32-bit unsigned integer
    U32 = 5,
    /// 64-bit unsigned integer
    U64 = 6,
    /// Any other layout, described only by its bounds
    Derived = 7,
}

/// Layout of one element: extent plus the true lower bound and true extent.
///
/// The true bounds may differ from the extent for derived layouts; in
/// particular `true_lb` may be negative, which the scratch allocator accounts
/// for through [`ScratchLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Datatype {
    tag: DatatypeTag,
    extent: isize,
    true_lb: isize,
    true_extent: isize,
}

impl Datatype {
    const fn builtin(tag: DatatypeTag, size: usize) -> Self {
        Datatype {
            tag,
            extent: size as isize,
            true_lb: 0,
            true_extent: size as isize,
        }
    }

    /// Get the datatype of an [`Element`] type.
    pub fn of<T: Element>() -> Self {
        T::datatype()
    }

    /// Describe a derived layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBuffer`] if `extent` or `true_extent` is negative.
    pub fn derived(extent: isize, true_lb: isize, true_extent: isize) -> Result<Self> {
        if extent < 0 || true_extent < 0 {
            return Err(Error::InvalidBuffer(format!(
                "datatype extents must be non-negative (extent {extent}, true extent {true_extent})"
            )));
        }
        Ok(Datatype {
            tag: DatatypeTag::Derived,
            extent,
            true_lb,
            true_extent,
        })
    }

    /// Describe a Rust type that has no built-in tag.
    pub const fn opaque<T>() -> Self {
        Self::builtin(DatatypeTag::Derived, std::mem::size_of::<T>())
    }

    /// The element tag.
    pub fn tag(&self) -> DatatypeTag {
        self.tag
    }

    /// Distance between consecutive elements in bytes.
    pub fn extent(&self) -> isize {
        self.extent
    }

    /// Offset of the first byte actually touched, relative to the element start.
    pub fn true_lb(&self) -> isize {
        self.true_lb
    }

    /// Number of bytes spanned by the data of one element.
    pub fn true_extent(&self) -> isize {
        self.true_extent
    }

    /// Layout of a scratch buffer holding `count` elements of this type.
    pub fn scratch_layout(&self, count: usize) -> Result<ScratchLayout> {
        ScratchLayout::new(count, self)
    }
}

/// Types that can be carried by a scan.
///
/// Implemented for the built-in numeric types and `String`. Implement it for
/// your own element types, usually with [`Datatype::opaque`].
pub trait Element: Clone + Send + 'static {
    /// Layout descriptor for this element type.
    fn datatype() -> Datatype;
}

macro_rules! impl_element {
    ($ty:ty, $tag:expr) => {
        impl Element for $ty {
            fn datatype() -> Datatype {
                Datatype::builtin($tag, std::mem::size_of::<$ty>())
            }
        }
    };
}

impl_element!(f32, DatatypeTag::F32);
impl_element!(f64, DatatypeTag::F64);
impl_element!(i32, DatatypeTag::I32);
impl_element!(i64, DatatypeTag::I64);
impl_element!(u8, DatatypeTag::U8);
impl_element!(u32, DatatypeTag::U32);
impl_element!(u64, DatatypeTag::U64);

impl Element for String {
    fn datatype() -> Datatype {
        Datatype::opaque::<String>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_extents() {
        assert_eq!(Datatype::of::<f32>().extent(), 4);
        assert_eq!(Datatype::of::<f64>().extent(), 8);
        assert_eq!(Datatype::of::<i32>().extent(), 4);
        assert_eq!(Datatype::of::<i64>().extent(), 8);
        assert_eq!(Datatype::of::<u8>().extent(), 1);
        assert_eq!(Datatype::of::<u32>().extent(), 4);
        assert_eq!(Datatype::of::<u64>().extent(), 8);
    }

    #[test]
    fn builtin_tags() {
        assert_eq!(Datatype::of::<f64>().tag(), DatatypeTag::F64);
        assert_eq!(Datatype::of::<u8>().tag(), DatatypeTag::U8);
        assert_eq!(Datatype::of::<String>().tag(), DatatypeTag::Derived);
    }

    #[test]
    fn builtin_bounds_are_tight() {
        let dt = Datatype::of::<i64>();
        assert_eq!(dt.true_lb(), 0);
        assert_eq!(dt.true_extent(), dt.extent());
    }

    #[test]
    fn derived_rejects_negative_extent() {
        assert!(Datatype::derived(-4, 0, 4).is_err());
        assert!(Datatype::derived(4, 0, -1).is_err());
        let dt = Datatype::derived(16, -8, 24).unwrap();
        assert_eq!(dt.true_lb(), -8);
        assert_eq!(dt.tag(), DatatypeTag::Derived);
    }
}
