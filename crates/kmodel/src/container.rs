// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The model container: validated section table plus the scratch arena.

use crate::header::{HEADER_BYTES, LAYER_HEADER_BYTES, OUTPUT_DESCRIPTOR_BYTES};
use crate::{
    Arena, LayerHeader, ModelError, ModelHeader, OutputDescriptor, SUPPORTED_ARCH,
    SUPPORTED_VERSION,
};

/// A loaded kmodel.
///
/// Borrows the model buffer for its whole lifetime (weights are read in
/// place, never copied) and owns the scratch arena the layers compute in.
/// The arena is stored as `u64` words so compiler-assigned float offsets
/// are always aligned.
pub struct ModelContainer<'m> {
    model: &'m [u8],
    header: ModelHeader,
    outputs_offset: usize,
    layer_headers_offset: usize,
    body_offset: usize,
    scratch: Box<[u64]>,
}

impl<'m> ModelContainer<'m> {
    /// Validates the header and section bounds, then allocates the scratch
    /// arena. Fails with [`ModelError::BadArtifact`] on a version or
    /// architecture mismatch.
    pub fn load(model: &'m [u8]) -> Result<Self, ModelError> {
        let header = ModelHeader::parse(model)?;
        if header.version != SUPPORTED_VERSION || header.arch != SUPPORTED_ARCH {
            return Err(ModelError::BadArtifact {
                version: header.version,
                arch: header.arch,
            });
        }

        let outputs_offset = HEADER_BYTES;
        let layer_headers_offset =
            outputs_offset + header.output_count as usize * OUTPUT_DESCRIPTOR_BYTES;
        let body_offset =
            layer_headers_offset + header.layers_length as usize * LAYER_HEADER_BYTES;
        if body_offset > model.len() {
            return Err(ModelError::Truncated {
                section: "section table",
            });
        }

        let scratch_words = (header.main_mem_usage as usize).div_ceil(8);
        Ok(Self {
            model,
            header,
            outputs_offset,
            layer_headers_offset,
            body_offset,
            scratch: vec![0u64; scratch_words].into_boxed_slice(),
        })
    }

    pub fn header(&self) -> &ModelHeader {
        &self.header
    }

    /// The whole model buffer (weights, tables and bodies are addressed
    /// into it by offset).
    pub fn model_bytes(&self) -> &'m [u8] {
        self.model
    }

    pub fn layers_length(&self) -> u32 {
        self.header.layers_length
    }

    pub fn output_count(&self) -> u32 {
        self.header.output_count
    }

    /// Layer header by index.
    pub fn layer_header(&self, index: u32) -> Result<LayerHeader, ModelError> {
        if index >= self.header.layers_length {
            return Err(ModelError::Truncated {
                section: "layer table",
            });
        }
        LayerHeader::parse(
            self.model,
            self.layer_headers_offset + index as usize * LAYER_HEADER_BYTES,
        )
    }

    /// Output descriptor by index.
    pub fn output_descriptor(&self, index: u32) -> Result<OutputDescriptor, ModelError> {
        if index >= self.header.output_count {
            return Err(ModelError::OutOfRange {
                index,
                count: self.header.output_count,
            });
        }
        OutputDescriptor::parse(
            self.model,
            self.outputs_offset + index as usize * OUTPUT_DESCRIPTOR_BYTES,
        )
    }

    /// The scratch region of output `index`.
    pub fn output(&self, index: u32) -> Result<&[u8], ModelError> {
        let descriptor = self.output_descriptor(index)?;
        let scratch: &[u8] = bytemuck::cast_slice(&self.scratch);
        scratch
            .get(descriptor.address as usize..(descriptor.address + descriptor.size) as usize)
            .ok_or(ModelError::ScratchBounds {
                offset: descriptor.address as usize,
                len: descriptor.size as usize,
                capacity: scratch.len(),
            })
    }

    /// Begins an inference: a context positioned at layer 0 with the body
    /// cursor at the start of the body stream.
    pub fn bind(&mut self) -> ExecutionContext<'m, '_> {
        let model = self.model;
        let layer_headers_offset = self.layer_headers_offset;
        let body_offset = self.body_offset;
        let layers_length = self.header.layers_length;
        ExecutionContext {
            model,
            layer_headers_offset,
            layers_length,
            current_layer: 0,
            body_cursor: body_offset,
            arena: Arena::new(bytemuck::cast_slice_mut(&mut self.scratch)),
        }
    }
}

/// Per-inference cursor over the layer stream, plus the scratch arena.
///
/// `'m` is the model buffer lifetime, `'c` the exclusive borrow of the
/// container for this inference. Holding the context is what serialises
/// scratch access: a second inference cannot bind until the first context
/// is dropped.
pub struct ExecutionContext<'m, 'c> {
    model: &'m [u8],
    layer_headers_offset: usize,
    layers_length: u32,
    current_layer: u32,
    body_cursor: usize,
    /// The scratch arena all auxiliary layers read and write.
    pub arena: Arena<'c>,
}

impl<'m, 'c> ExecutionContext<'m, 'c> {
    pub fn model_bytes(&self) -> &'m [u8] {
        self.model
    }

    pub fn layers_length(&self) -> u32 {
        self.layers_length
    }

    /// Index of the layer the cursor is standing on.
    pub fn current_layer(&self) -> u32 {
        self.current_layer
    }

    /// True once every layer has been consumed.
    pub fn finished(&self) -> bool {
        self.current_layer == self.layers_length
    }

    /// The header of the layer the cursor stands on, without advancing.
    pub fn peek_header(&self) -> Result<LayerHeader, ModelError> {
        if self.finished() {
            return Err(ModelError::Truncated {
                section: "layer table",
            });
        }
        LayerHeader::parse(
            self.model,
            self.layer_headers_offset + self.current_layer as usize * crate::header::LAYER_HEADER_BYTES,
        )
    }

    /// The body bytes of the layer the cursor stands on, without
    /// advancing.
    pub fn peek_body(&self) -> Result<&'m [u8], ModelError> {
        let header = self.peek_header()?;
        self.model
            .get(self.body_cursor..self.body_cursor + header.body_size as usize)
            .ok_or(ModelError::Truncated {
                section: "body stream",
            })
    }

    /// Consumes the current layer: returns its header and body bytes and
    /// advances the cursor by the header's declared body size.
    pub fn next_layer(&mut self) -> Result<(u32, LayerHeader, &'m [u8]), ModelError> {
        let index = self.current_layer;
        let header = self.peek_header()?;
        let body = self.peek_body()?;
        self.current_layer += 1;
        self.body_cursor += header.body_size as usize;
        Ok((index, header, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModelBuilder;
    use crate::LayerType;

    #[test]
    fn test_load_rejects_bad_version() {
        let mut model = ModelBuilder::new().main_mem_usage(64).build();
        model[0..4].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            ModelContainer::load(&model),
            Err(ModelError::BadArtifact { version: 2, arch: 0 })
        ));
    }

    #[test]
    fn test_load_rejects_bad_arch() {
        let mut model = ModelBuilder::new().main_mem_usage(64).build();
        model[8..12].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            ModelContainer::load(&model),
            Err(ModelError::BadArtifact { version: 3, arch: 7 })
        ));
    }

    #[test]
    fn test_load_rejects_truncated_tables() {
        let model = ModelBuilder::new()
            .main_mem_usage(64)
            .softmax(0, 32, 4)
            .build();
        // Chop into the layer table.
        assert!(matches!(
            ModelContainer::load(&model[..crate::HEADER_BYTES + 2]),
            Err(ModelError::Truncated { .. })
        ));
    }

    #[test]
    fn test_output_regions_sit_inside_scratch() {
        let model = ModelBuilder::new()
            .main_mem_usage(256)
            .output(64, 32)
            .output(128, 64)
            .build();
        let container = ModelContainer::load(&model).unwrap();
        assert_eq!(container.output(0).unwrap().len(), 32);
        assert_eq!(container.output(1).unwrap().len(), 64);
        assert!(matches!(
            container.output(2),
            Err(ModelError::OutOfRange { index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_bind_walks_layer_stream() {
        let model = ModelBuilder::new()
            .main_mem_usage(256)
            .softmax(0, 64, 4)
            .dequantize(64, 128, 8, 0.5, 0.0)
            .build();
        let mut container = ModelContainer::load(&model).unwrap();
        let mut ctx = container.bind();

        let (index, header, _body) = ctx.next_layer().unwrap();
        assert_eq!(index, 0);
        assert_eq!(header.layer_type, LayerType::Softmax as u32);

        let (index, header, _body) = ctx.next_layer().unwrap();
        assert_eq!(index, 1);
        assert_eq!(header.layer_type, LayerType::Dequantize as u32);
        assert!(ctx.finished());
        assert!(ctx.next_layer().is_err());
    }

    #[test]
    fn test_rebind_resets_cursor() {
        let model = ModelBuilder::new()
            .main_mem_usage(64)
            .softmax(0, 32, 4)
            .build();
        let mut container = ModelContainer::load(&model).unwrap();
        {
            let mut ctx = container.bind();
            ctx.next_layer().unwrap();
            assert!(ctx.finished());
        }
        let ctx = container.bind();
        assert_eq!(ctx.current_layer(), 0);
        assert!(!ctx.finished());
    }
}
