//! Materials: a uniform parameter block, four texture slots and the
//! descriptor set binding them
//!
//! Slots without a texture bind one of the shared 1x1 defaults, so every
//! binding of the set is always valid.

use crate::render::api::{DescriptorSetHandle, DescriptorWrite, GpuDevice, ShaderStages};
use crate::render::descriptor::{DescriptorSetLayout, DescriptorSetLayoutBuilder};
use crate::render::error::RenderResult;
use crate::render::resources::{GpuBuffer, GpuTexture};
use crate::render::transfer::{TextureData, TransferEngine};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

/// Uniform block at binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialParams {
    /// Linear RGBA multiplier for the albedo texture
    pub base_color: [f32; 4],
    /// Linear RGB emissive multiplier, alpha unused
    pub emissive: [f32; 4],
    /// Metallic multiplier
    pub metallic: f32,
    /// Roughness multiplier
    pub roughness: f32,
    /// Normal map strength
    pub normal_scale: f32,
    /// Alpha cutoff for masked materials, 0 disables
    pub alpha_cutoff: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            base_color: [1.0; 4],
            emissive: [0.0; 4],
            metallic: 0.0,
            roughness: 0.5,
            normal_scale: 1.0,
            alpha_cutoff: 0.0,
        }
    }
}

/// Texture slots of a material, in binding order after the uniform block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    /// Base color (sRGB)
    Albedo,
    /// Tangent-space normal map (linear)
    Normal,
    /// Metallic in B, roughness in G (linear)
    MetallicRoughness,
    /// Emissive color (sRGB)
    Emissive,
}

impl TextureSlot {
    /// Every slot in binding order
    pub const ALL: [TextureSlot; 4] = [Self::Albedo, Self::Normal, Self::MetallicRoughness, Self::Emissive];

    /// Array index of the slot
    pub fn index(self) -> usize {
        match self {
            Self::Albedo => 0,
            Self::Normal => 1,
            Self::MetallicRoughness => 2,
            Self::Emissive => 3,
        }
    }

    /// Descriptor binding of the slot
    pub fn binding(self) -> u32 {
        self.index() as u32 + 1
    }

}

/// Material description at the asset boundary
#[derive(Debug, Clone, Default)]
pub struct MaterialDesc {
    /// Uniform parameters
    pub params: MaterialParams,
    /// Optional texture per slot, indexed by [`TextureSlot::index`]
    pub textures: [Option<TextureData>; 4],
}

impl MaterialDesc {
    /// Material with only parameters
    pub fn new(params: MaterialParams) -> Self {
        Self { params, textures: Default::default() }
    }

    /// Attach a texture to a slot
    pub fn with_texture(mut self, slot: TextureSlot, texture: TextureData) -> Self {
        self.textures[slot.index()] = Some(texture);
        self
    }
}

/// Shared 1x1 fallbacks for empty slots
pub struct DefaultTextures<D: GpuDevice> {
    white: GpuTexture<D>,
    flat_normal: GpuTexture<D>,
    black: GpuTexture<D>,
}

impl<D: GpuDevice> DefaultTextures<D> {
    /// Upload the fallback textures
    pub fn new(transfer: &TransferEngine<D>) -> RenderResult<Self> {
        Ok(Self {
            white: transfer.upload_texture(&TextureData::solid([255, 255, 255, 255], true))?,
            flat_normal: transfer.upload_texture(&TextureData::solid([128, 128, 255, 255], false))?,
            black: transfer.upload_texture(&TextureData::solid([0, 0, 0, 255], true))?,
        })
    }

    /// Fallback for a slot
    pub fn for_slot(&self, slot: TextureSlot) -> &GpuTexture<D> {
        match slot {
            TextureSlot::Albedo | TextureSlot::MetallicRoughness => &self.white,
            TextureSlot::Normal => &self.flat_normal,
            TextureSlot::Emissive => &self.black,
        }
    }
}

/// Descriptor set layout shared by every material
pub fn material_layout<D: GpuDevice>(device: Arc<D>) -> RenderResult<DescriptorSetLayout<D>> {
    TextureSlot::ALL
        .iter()
        .fold(
            DescriptorSetLayoutBuilder::new().add_uniform_buffer(0, ShaderStages::VERTEX | ShaderStages::FRAGMENT),
            |builder, slot| builder.add_combined_image_sampler(slot.binding(), ShaderStages::FRAGMENT),
        )
        .build(device)
}

/// GPU-resident material
pub struct Material<D: GpuDevice> {
    params: MaterialParams,
    params_buffer: GpuBuffer<D>,
    textures: [Option<GpuTexture<D>>; 4],
    descriptor_set: DescriptorSetHandle,
}

impl<D: GpuDevice> Material<D> {
    /// Assemble a material from uploaded parts and its allocated set
    pub fn new(
        params: MaterialParams,
        params_buffer: GpuBuffer<D>,
        textures: [Option<GpuTexture<D>>; 4],
        descriptor_set: DescriptorSetHandle,
    ) -> Self {
        Self { params, params_buffer, textures, descriptor_set }
    }

    /// Uniform parameters
    pub fn params(&self) -> &MaterialParams {
        &self.params
    }

    /// Descriptor set owned by this material
    pub fn descriptor_set(&self) -> DescriptorSetHandle {
        self.descriptor_set
    }

    /// Texture bound at a slot, if not the default
    pub fn texture(&self, slot: TextureSlot) -> Option<&GpuTexture<D>> {
        self.textures[slot.index()].as_ref()
    }

    /// Descriptor write for one texture slot
    pub fn slot_write(&self, slot: TextureSlot, defaults: &DefaultTextures<D>) -> DescriptorWrite {
        let texture = self.texture(slot).unwrap_or_else(|| defaults.for_slot(slot));
        DescriptorWrite::image(slot.binding(), texture.view(), texture.sampler())
    }

    /// Every write the set needs
    pub fn writes(&self, defaults: &DefaultTextures<D>) -> Vec<DescriptorWrite> {
        let mut writes = vec![DescriptorWrite::uniform(0, self.params_buffer.handle(), self.params_buffer.size())];
        writes.extend(TextureSlot::ALL.iter().map(|&slot| self.slot_write(slot, defaults)));
        writes
    }

    /// Put a new texture in a slot, returning the previous one
    ///
    /// The caller keeps the old texture alive until no frame can sample it.
    pub fn replace_texture(&mut self, slot: TextureSlot, texture: GpuTexture<D>) -> Option<GpuTexture<D>> {
        self.textures[slot.index()].replace(texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockDevice;
    use crate::render::api::{DescriptorResource, DescriptorType};

    #[test]
    fn test_params_block_is_std140_friendly() {
        assert_eq!(std::mem::size_of::<MaterialParams>(), 48);
        assert_eq!(std::mem::size_of::<MaterialParams>() % 16, 0);
    }

    #[test]
    fn test_slot_bindings() {
        let bindings: Vec<u32> = TextureSlot::ALL.iter().map(|s| s.binding()).collect();
        assert_eq!(bindings, vec![1, 2, 3, 4]);
        assert_eq!(TextureSlot::ALL.map(TextureSlot::index), [0, 1, 2, 3]);
    }

    #[test]
    fn test_layout_has_uniform_and_four_samplers() {
        let device = MockDevice::shared();
        let layout = material_layout(device).expect("Should build layout");
        assert_eq!(layout.bindings().len(), 5);
        assert_eq!(layout.bindings()[0].ty, DescriptorType::UniformBuffer);
        assert!(layout.bindings()[1..].iter().all(|b| b.ty == DescriptorType::CombinedImageSampler));
    }

    #[test]
    fn test_empty_slots_fall_back_to_defaults() {
        let device = MockDevice::shared();
        let transfer = TransferEngine::new(device.clone(), 1 << 20, None);
        let defaults = DefaultTextures::new(&transfer).expect("Should upload defaults");
        let albedo = transfer
            .upload_texture(&TextureData::rgba8_srgb(2, 2, vec![255; 16]))
            .expect("Should upload albedo");
        let albedo_view = albedo.view();

        let params = MaterialParams::default();
        let buffer = GpuBuffer::uniform_with_data(device.clone(), bytemuck::bytes_of(&params)).expect("buffer");
        let material = Material::new(params, buffer, [Some(albedo), None, None, None], DescriptorSetHandle(1));

        let writes = material.writes(&defaults);
        assert_eq!(writes.len(), 5);
        assert!(matches!(writes[1].resource, DescriptorResource::Image { view, .. } if view == albedo_view));
        assert!(matches!(
            writes[2].resource,
            DescriptorResource::Image { view, .. } if view == defaults.for_slot(TextureSlot::Normal).view()
        ));
    }
}
