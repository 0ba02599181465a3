//! Mesh data at the asset boundary and its GPU-resident form
//!
//! The asset loader hands over flat arrays; [`MeshData`] validates and
//! interleaves them. Skinned and static meshes share one record, with the
//! joint data carried in an optional [`SkinningData`].

use crate::render::api::{BufferUsage, GpuDevice};
use crate::render::error::{RenderError, RenderResult};
use crate::render::resources::GpuBuffer;
use crate::render::transfer::TransferEngine;
use bytemuck::{Pod, Zeroable};
use nalgebra::Matrix4;

/// Interleaved vertex with position, normal and texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub tex_coord: [f32; 2],
}

/// Per-vertex joint influences, uploaded as a second vertex stream
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct SkinVertex {
    /// Up to four joint indices
    pub joints: [u32; 4],
    /// Matching weights, normalized to sum to one
    pub weights: [f32; 4],
}

/// Joint arrays for a skinned mesh
#[derive(Debug, Clone, PartialEq)]
pub struct SkinningData {
    /// Four joint indices per vertex
    pub joint_indices: Vec<[u32; 4]>,
    /// Four weights per vertex
    pub joint_weights: Vec<[f32; 4]>,
    /// One inverse bind matrix per joint
    pub inverse_bind_matrices: Vec<Matrix4<f32>>,
}

/// Flat geometry arrays from the asset loader
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    /// Vertex positions
    pub positions: Vec<[f32; 3]>,
    /// Vertex normals; empty means +Y for every vertex
    pub normals: Vec<[f32; 3]>,
    /// Texture coordinates; empty means (0, 0)
    pub tex_coords: Vec<[f32; 2]>,
    /// Triangle list indices
    pub indices: Vec<u32>,
    /// Joint data for skinned meshes
    pub skinning: Option<SkinningData>,
}

fn bad_mesh(reason: String) -> RenderError {
    RenderError::TransferFailed(format!("invalid mesh: {reason}"))
}

impl MeshData {
    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Check array lengths and index ranges
    pub fn validate(&self) -> RenderResult<()> {
        let count = self.positions.len();
        if count == 0 || self.indices.is_empty() {
            return Err(bad_mesh("no vertices or indices".to_string()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(bad_mesh(format!("{} indices is not a triangle list", self.indices.len())));
        }
        if !self.normals.is_empty() && self.normals.len() != count {
            return Err(bad_mesh(format!("{} normals for {count} positions", self.normals.len())));
        }
        if !self.tex_coords.is_empty() && self.tex_coords.len() != count {
            return Err(bad_mesh(format!("{} UVs for {count} positions", self.tex_coords.len())));
        }
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(bad_mesh(format!("index {index} out of range for {count} vertices")));
        }

        if let Some(skin) = &self.skinning {
            if skin.joint_indices.len() != count || skin.joint_weights.len() != count {
                return Err(bad_mesh(format!(
                    "skinning arrays ({}, {}) do not match {count} vertices",
                    skin.joint_indices.len(),
                    skin.joint_weights.len()
                )));
            }
            let joints = skin.inverse_bind_matrices.len() as u32;
            if let Some(joint) = skin.joint_indices.iter().flatten().find(|&&j| j >= joints) {
                return Err(bad_mesh(format!("joint {joint} out of range for {joints} joints")));
            }
        }
        Ok(())
    }

    /// Interleave the attribute arrays
    pub fn vertices(&self) -> Vec<Vertex> {
        (0..self.positions.len())
            .map(|i| Vertex {
                position: self.positions[i],
                normal: self.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
                tex_coord: self.tex_coords.get(i).copied().unwrap_or([0.0, 0.0]),
            })
            .collect()
    }

    /// Joint stream with weights renormalized, `None` for static meshes
    pub fn skin_vertices(&self) -> Option<Vec<SkinVertex>> {
        let skin = self.skinning.as_ref()?;
        Some(
            skin.joint_indices
                .iter()
                .zip(&skin.joint_weights)
                .map(|(&joints, &weights)| {
                    let sum: f32 = weights.iter().sum();
                    let weights = if sum > f32::EPSILON { weights.map(|w| w / sum) } else { [1.0, 0.0, 0.0, 0.0] };
                    SkinVertex { joints, weights }
                })
                .collect(),
        )
    }

    /// Unit cube centred on the origin, one face per 4 vertices
    pub fn cube() -> Self {
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ];
        let mut mesh = MeshData::default();
        for (face, (n, u, v)) in faces.iter().enumerate() {
            let base = (face * 4) as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                mesh.positions.push([
                    0.5 * (n[0] + su * u[0] + sv * v[0]),
                    0.5 * (n[1] + su * u[1] + sv * v[1]),
                    0.5 * (n[2] + su * u[2] + sv * v[2]),
                ]);
                mesh.normals.push(*n);
                mesh.tex_coords.push([(su + 1.0) * 0.5, (1.0 - sv) * 0.5]);
            }
            mesh.indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        mesh
    }
}

/// Device-resident mesh
pub struct GpuMesh<D: GpuDevice> {
    vertex_buffer: GpuBuffer<D>,
    index_buffer: GpuBuffer<D>,
    index_count: u32,
    skin: Option<GpuSkin<D>>,
}

/// Device-resident joint data
pub struct GpuSkin<D: GpuDevice> {
    /// Joint indices and weights per vertex
    pub joint_buffer: GpuBuffer<D>,
    /// Column-major inverse bind matrices
    pub inverse_bind_buffer: GpuBuffer<D>,
    /// Number of joints
    pub joint_count: u32,
}

impl<D: GpuDevice> GpuMesh<D> {
    /// Validate, interleave and upload
    pub fn upload(transfer: &TransferEngine<D>, data: &MeshData) -> RenderResult<Self> {
        data.validate()?;

        let vertices = data.vertices();
        let vertex_buffer = transfer.upload(bytemuck::cast_slice(&vertices), BufferUsage::VERTEX)?;
        let index_buffer = transfer.upload(bytemuck::cast_slice(&data.indices), BufferUsage::INDEX)?;

        let skin = match (&data.skinning, data.skin_vertices()) {
            (Some(skinning), Some(joints)) => {
                let matrices: Vec<f32> = skinning
                    .inverse_bind_matrices
                    .iter()
                    .flat_map(|m| m.as_slice().iter().copied())
                    .collect();
                Some(GpuSkin {
                    joint_buffer: transfer.upload(bytemuck::cast_slice(&joints), BufferUsage::VERTEX)?,
                    inverse_bind_buffer: transfer.upload(bytemuck::cast_slice(&matrices), BufferUsage::STORAGE)?,
                    joint_count: skinning.inverse_bind_matrices.len() as u32,
                })
            }
            _ => None,
        };

        log::debug!(
            "Uploaded mesh: {} vertices, {} indices{}",
            vertices.len(),
            data.indices.len(),
            if skin.is_some() { ", skinned" } else { "" }
        );

        Ok(Self { vertex_buffer, index_buffer, index_count: data.indices.len() as u32, skin })
    }

    /// Interleaved vertex buffer
    pub fn vertex_buffer(&self) -> &GpuBuffer<D> {
        &self.vertex_buffer
    }

    /// `u32` index buffer
    pub fn index_buffer(&self) -> &GpuBuffer<D> {
        &self.index_buffer
    }

    /// Number of indices to draw
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Joint data for skinned meshes
    pub fn skin(&self) -> Option<&GpuSkin<D>> {
        self.skin.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockDevice;
    use approx::assert_relative_eq;

    fn triangle() -> MeshData {
        MeshData {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            indices: vec![0, 1, 2],
            ..MeshData::default()
        }
    }

    #[test]
    fn test_vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::size_of::<SkinVertex>(), 32);
    }

    #[test]
    fn test_missing_attributes_get_defaults() {
        let vertices = triangle().vertices();
        assert_eq!(vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(vertices[1].normal, [0.0, 1.0, 0.0]);
        assert_eq!(vertices[1].tex_coord, [0.0, 0.0]);
    }

    #[test]
    fn test_validation_rejects_bad_indices() {
        let mut mesh = triangle();
        mesh.indices = vec![0, 1, 3];
        assert!(matches!(mesh.validate(), Err(RenderError::TransferFailed(_))));
        mesh.indices = vec![0, 1];
        assert!(mesh.validate().is_err());
        mesh.indices.clear();
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_mismatched_skin() {
        let mut mesh = triangle();
        mesh.skinning = Some(SkinningData {
            joint_indices: vec![[0, 0, 0, 0]; 3],
            joint_weights: vec![[1.0, 0.0, 0.0, 0.0]; 2],
            inverse_bind_matrices: vec![Matrix4::identity()],
        });
        assert!(mesh.validate().is_err());

        if let Some(skin) = mesh.skinning.as_mut() {
            skin.joint_weights.push([1.0, 0.0, 0.0, 0.0]);
            skin.joint_indices[2] = [0, 1, 0, 0];
        }
        assert!(mesh.validate().is_err(), "joint 1 has no inverse bind matrix");
    }

    #[test]
    fn test_skin_weights_are_normalized() {
        let mut mesh = triangle();
        mesh.skinning = Some(SkinningData {
            joint_indices: vec![[0, 1, 0, 0]; 3],
            joint_weights: vec![[2.0, 2.0, 0.0, 0.0], [0.0; 4], [0.3, 0.1, 0.0, 0.0]],
            inverse_bind_matrices: vec![Matrix4::identity(); 2],
        });
        let joints = mesh.skin_vertices().expect("skinned");
        assert_relative_eq!(joints[0].weights[0], 0.5);
        assert_eq!(joints[1].weights, [1.0, 0.0, 0.0, 0.0]);
        assert_relative_eq!(joints[2].weights.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cube_is_valid() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.indices.len(), 36);
        cube.validate().expect("cube is valid");
        for p in &cube.positions {
            assert!(p.iter().all(|c| c.abs() <= 0.5 + f32::EPSILON));
        }
    }

    #[test]
    fn test_upload_skinned_mesh() {
        let device = MockDevice::shared();
        let transfer = TransferEngine::new(device.clone(), 1 << 20, None);
        let mut mesh = triangle();
        mesh.skinning = Some(SkinningData {
            joint_indices: vec![[0, 0, 0, 0]; 3],
            joint_weights: vec![[1.0, 0.0, 0.0, 0.0]; 3],
            inverse_bind_matrices: vec![Matrix4::new_translation(&nalgebra::Vector3::new(1.0, 2.0, 3.0))],
        });
        let gpu = GpuMesh::upload(&transfer, &mesh).expect("Should upload");
        assert_eq!(gpu.index_count(), 3);
        assert_eq!(gpu.vertex_buffer().size(), 3 * 32);

        let skin = gpu.skin().expect("skinned");
        assert_eq!(skin.joint_count, 1);
        let matrix: Vec<u8> = transfer.read_back(&skin.inverse_bind_buffer).expect("read back");
        let floats: Vec<f32> = matrix
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        // Column-major: translation sits in the last column
        assert_relative_eq!(floats[12], 1.0);
        assert_relative_eq!(floats[13], 2.0);
        assert_relative_eq!(floats[14], 3.0);
    }
}
