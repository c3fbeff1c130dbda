// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Checked, typed access into the scratch arena.
//!
//! Layer records address the arena with compiler-assigned byte offsets.
//! [`Arena`] turns those offsets into slices, enforcing three things the
//! raw buffer cannot: every range stays inside the arena, float views are
//! properly aligned, and a layer's input and output regions do not overlap
//! (except for the byte-identical in-place case, which callers handle
//! explicitly). The backing storage is `u64` words, so any 4-byte-aligned
//! offset yields a valid `f32` view.

use crate::ModelError;
use bytemuck::Pod;
use std::mem::size_of;
use std::ops::Range;

/// A borrowed view of the scratch buffer with typed accessors.
pub struct Arena<'a> {
    bytes: &'a mut [u8],
}

impl<'a> Arena<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bus address of an arena offset, for DMA destinations.
    pub fn bus_addr(&self, offset: u32) -> usize {
        self.bytes.as_ptr() as usize + offset as usize
    }

    fn check(&self, offset: usize, len: usize) -> Result<Range<usize>, ModelError> {
        let end = offset.checked_add(len).ok_or(ModelError::ScratchBounds {
            offset,
            len,
            capacity: self.bytes.len(),
        })?;
        if end > self.bytes.len() {
            return Err(ModelError::ScratchBounds {
                offset,
                len,
                capacity: self.bytes.len(),
            });
        }
        Ok(offset..end)
    }

    /// Read-only byte region.
    pub fn bytes(&self, offset: u32, len: usize) -> Result<&[u8], ModelError> {
        let range = self.check(offset as usize, len)?;
        Ok(&self.bytes[range])
    }

    /// Mutable byte region.
    pub fn bytes_mut(&mut self, offset: u32, len: usize) -> Result<&mut [u8], ModelError> {
        let range = self.check(offset as usize, len)?;
        Ok(&mut self.bytes[range])
    }

    /// A read-only source and a mutable destination, checked disjoint.
    ///
    /// `S` and `D` are the element types of the two regions; counts are in
    /// elements.
    pub fn src_dest<S: Pod, D: Pod>(
        &mut self,
        src_offset: u32,
        src_count: usize,
        dest_offset: u32,
        dest_count: usize,
    ) -> Result<(&[S], &mut [D]), ModelError> {
        let src = self.check(src_offset as usize, src_count * size_of::<S>())?;
        let dest = self.check(dest_offset as usize, dest_count * size_of::<D>())?;
        if overlaps(&src, &dest) {
            return Err(ModelError::ScratchOverlap);
        }

        // Disjointness was just verified, so one source view and one
        // destination view of the arena cannot alias.
        let base = self.bytes.as_mut_ptr();
        let src_slice = unsafe { std::slice::from_raw_parts(base.add(src.start), src.len()) };
        let dest_slice =
            unsafe { std::slice::from_raw_parts_mut(base.add(dest.start), dest.len()) };
        Ok((cast(src_slice, src_offset)?, cast_mut(dest_slice, dest_offset)?))
    }

    /// Two read-only sources and a mutable destination. The sources may
    /// alias each other but not the destination.
    pub fn src2_dest<S: Pod, D: Pod>(
        &mut self,
        a_offset: u32,
        b_offset: u32,
        src_count: usize,
        dest_offset: u32,
        dest_count: usize,
    ) -> Result<(&[S], &[S], &mut [D]), ModelError> {
        let a = self.check(a_offset as usize, src_count * size_of::<S>())?;
        let b = self.check(b_offset as usize, src_count * size_of::<S>())?;
        let dest = self.check(dest_offset as usize, dest_count * size_of::<D>())?;
        if overlaps(&a, &dest) || overlaps(&b, &dest) {
            return Err(ModelError::ScratchOverlap);
        }

        let base = self.bytes.as_mut_ptr();
        let a_slice = unsafe { std::slice::from_raw_parts(base.add(a.start), a.len()) };
        let b_slice = unsafe { std::slice::from_raw_parts(base.add(b.start), b.len()) };
        let dest_slice =
            unsafe { std::slice::from_raw_parts_mut(base.add(dest.start), dest.len()) };
        Ok((
            cast(a_slice, a_offset)?,
            cast(b_slice, b_offset)?,
            cast_mut(dest_slice, dest_offset)?,
        ))
    }

    /// Copies `len` bytes from `src_offset` to `dest_offset`, allowing
    /// overlap (memmove semantics). Used by concat.
    pub fn copy_bytes(
        &mut self,
        src_offset: u32,
        dest_offset: u32,
        len: usize,
    ) -> Result<(), ModelError> {
        let src = self.check(src_offset as usize, len)?;
        self.check(dest_offset as usize, len)?;
        self.bytes.copy_within(src, dest_offset as usize);
        Ok(())
    }
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end && !a.is_empty() && !b.is_empty()
}

fn cast<T: Pod>(bytes: &[u8], offset: u32) -> Result<&[T], ModelError> {
    bytemuck::try_cast_slice(bytes).map_err(|_| ModelError::Misaligned {
        offset: offset as usize,
    })
}

fn cast_mut<T: Pod>(bytes: &mut [u8], offset: u32) -> Result<&mut [T], ModelError> {
    bytemuck::try_cast_slice_mut(bytes).map_err(|_| ModelError::Misaligned {
        offset: offset as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backing(words: usize) -> Vec<u64> {
        vec![0u64; words]
    }

    #[test]
    fn test_bytes_bounds() {
        let mut storage = backing(4);
        let arena = Arena::new(bytemuck::cast_slice_mut(&mut storage));
        assert!(arena.bytes(0, 32).is_ok());
        assert!(matches!(
            arena.bytes(16, 17),
            Err(ModelError::ScratchBounds { .. })
        ));
    }

    #[test]
    fn test_src_dest_disjoint_typed() {
        let mut storage = backing(8);
        let mut arena = Arena::new(bytemuck::cast_slice_mut(&mut storage));

        {
            let dest = arena.bytes_mut(0, 8).unwrap();
            dest.copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        }
        let (src, dest) = arena.src_dest::<u8, f32>(0, 8, 32, 2).unwrap();
        assert_eq!(src, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(dest.len(), 2);
    }

    #[test]
    fn test_src_dest_overlap_rejected() {
        let mut storage = backing(8);
        let mut arena = Arena::new(bytemuck::cast_slice_mut(&mut storage));
        assert!(matches!(
            arena.src_dest::<u8, u8>(0, 16, 8, 16),
            Err(ModelError::ScratchOverlap)
        ));
    }

    #[test]
    fn test_src_dest_misaligned_float() {
        let mut storage = backing(8);
        let mut arena = Arena::new(bytemuck::cast_slice_mut(&mut storage));
        assert!(matches!(
            arena.src_dest::<f32, f32>(2, 2, 32, 2),
            Err(ModelError::Misaligned { .. })
        ));
    }

    #[test]
    fn test_src2_dest_sources_may_alias() {
        let mut storage = backing(8);
        let mut arena = Arena::new(bytemuck::cast_slice_mut(&mut storage));
        let (a, b, dest) = arena.src2_dest::<u8, u8>(0, 4, 8, 32, 8).unwrap();
        assert_eq!(a.len(), 8);
        assert_eq!(b.len(), 8);
        assert_eq!(dest.len(), 8);
    }

    #[test]
    fn test_copy_bytes_overlapping() {
        let mut storage = backing(2);
        let mut arena = Arena::new(bytemuck::cast_slice_mut(&mut storage));
        arena
            .bytes_mut(0, 8)
            .unwrap()
            .copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        arena.copy_bytes(0, 4, 8).unwrap();
        assert_eq!(arena.bytes(4, 8).unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
