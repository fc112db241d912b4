//! Vertex array descriptors.
//!
//! A `VertexArray` maps binding slots onto a vertex buffer: each binding is
//! `(offset, stride, dimension, element type)`. Binding 0 is the position
//! stream consumed implicitly by the vertex shader; higher bindings are
//! whatever the shader wants to fetch.

use crate::context::{IboId, VboId};
use crate::error::{RenderError, RenderResult};

/// Number of components in a vertex attribute.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dimension {
    /// Scalar.
    One = 1,
    /// 2 components.
    Two = 2,
    /// 3 components.
    Three = 3,
    /// 4 components.
    Four = 4,
}

/// Element type of a vertex attribute.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    /// 8-bit integer.
    I8,
    /// 16-bit integer.
    I16,
    /// 32-bit integer.
    I32,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::I8 => 1,
            DataType::I16 => 2,
            DataType::I32 => 4,
            DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }
}

/// One binding slot: where an attribute lives inside the vertex buffer.
#[derive(Copy, Clone, Debug)]
pub struct Binding {
    /// Byte offset of the attribute for vertex 0.
    pub offset: usize,
    /// Byte distance between consecutive vertices.
    pub stride: usize,
    /// Component count.
    pub dimension: Dimension,
    /// Element type.
    pub data_type: DataType,
}

impl Default for Binding {
    fn default() -> Self {
        Self {
            offset: 0,
            stride: 0,
            dimension: Dimension::Four,
            data_type: DataType::F32,
        }
    }
}

impl Binding {
    /// Size of one attribute instance in bytes.
    #[inline(always)]
    pub fn attrib_size(&self) -> usize {
        self.dimension as usize * self.data_type.size()
    }
}

/// Maps binding slots to attribute locations over a VBO, with an optional IBO.
#[derive(Default)]
pub struct VertexArray {
    vbo: Option<VboId>,
    ibo: Option<IboId>,
    bindings: Vec<Binding>,
}

impl VertexArray {
    /// Creates an empty descriptor with no buffers and no bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates a vertex buffer.
    pub fn set_vertex_buffer(&mut self, id: VboId) {
        self.vbo = Some(id);
    }

    /// Associates an index buffer.
    pub fn set_index_buffer(&mut self, id: IboId) {
        self.ibo = Some(id);
    }

    /// The associated vertex buffer, if any.
    #[inline(always)]
    pub fn vertex_buffer(&self) -> Option<VboId> {
        self.vbo
    }

    /// The associated index buffer, if any.
    #[inline(always)]
    pub fn index_buffer(&self) -> Option<IboId> {
        self.ibo
    }

    /// True when an index buffer is attached.
    #[inline(always)]
    pub fn has_index_buffer(&self) -> bool {
        self.ibo.is_some()
    }

    /// Number of binding slots.
    #[inline(always)]
    pub fn num_bindings(&self) -> usize {
        self.bindings.len()
    }

    /// Grows or shrinks the binding table, returning the signed change in
    /// slot count. New slots are default-initialized.
    pub fn set_num_bindings(&mut self, n: usize) -> isize {
        let delta = n as isize - self.bindings.len() as isize;
        self.bindings.resize(n, Binding::default());
        delta
    }

    /// Describes one binding slot.
    pub fn set_binding(
        &mut self,
        slot: usize,
        offset: usize,
        stride: usize,
        dimension: Dimension,
        data_type: DataType,
    ) -> RenderResult<()> {
        let binding = self.bindings.get_mut(slot).ok_or(RenderError::BadArg)?;
        *binding = Binding {
            offset,
            stride,
            dimension,
            data_type,
        };
        Ok(())
    }

    /// Removes one binding slot, shifting higher slots down.
    pub fn remove_binding(&mut self, slot: usize) -> RenderResult<()> {
        if slot >= self.bindings.len() {
            return Err(RenderError::BadArg);
        }
        self.bindings.remove(slot);
        Ok(())
    }

    /// The binding at `slot`.
    #[inline(always)]
    pub fn binding(&self, slot: usize) -> &Binding {
        &self.bindings[slot]
    }

    /// Byte offset of `(slot, vert_id)` inside the vertex buffer.
    #[inline(always)]
    pub fn offset(&self, slot: usize, vert_id: u32) -> usize {
        let b = &self.bindings[slot];
        b.offset + b.stride * vert_id as usize
    }

    /// Checks every binding against a buffer extent for the vertex range
    /// `[0, max_vert]`. `BadArg` when any attribute would read past the end.
    pub(crate) fn validate_extent(&self, vbo_bytes: usize, max_vert: u32) -> RenderResult<()> {
        for b in &self.bindings {
            let last = b.offset + b.stride * max_vert as usize + b.attrib_size();
            if last > vbo_bytes {
                return Err(RenderError::BadArg);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_offsets() {
        let mut vao = VertexArray::new();
        assert_eq!(vao.set_num_bindings(2), 2);
        vao.set_binding(0, 0, 32, Dimension::Four, DataType::F32)
            .unwrap();
        vao.set_binding(1, 16, 32, Dimension::Four, DataType::F32)
            .unwrap();

        assert_eq!(vao.offset(0, 0), 0);
        assert_eq!(vao.offset(0, 3), 96);
        assert_eq!(vao.offset(1, 3), 112);
    }

    #[test]
    fn num_bindings_delta() {
        let mut vao = VertexArray::new();
        assert_eq!(vao.set_num_bindings(3), 3);
        assert_eq!(vao.set_num_bindings(1), -2);
        assert_eq!(vao.set_num_bindings(1), 0);
    }

    #[test]
    fn extent_validation() {
        let mut vao = VertexArray::new();
        vao.set_num_bindings(1);
        vao.set_binding(0, 0, 16, Dimension::Four, DataType::F32)
            .unwrap();

        // 3 vertices * 16-byte stride fits exactly in 48 bytes.
        assert!(vao.validate_extent(48, 2).is_ok());
        assert_eq!(
            vao.validate_extent(47, 2).err(),
            Some(RenderError::BadArg)
        );
    }

    #[test]
    fn bad_slot_is_rejected() {
        let mut vao = VertexArray::new();
        assert_eq!(
            vao.set_binding(0, 0, 0, Dimension::One, DataType::I8).err(),
            Some(RenderError::BadArg)
        );
        assert_eq!(vao.remove_binding(0).err(), Some(RenderError::BadArg));
    }
}
