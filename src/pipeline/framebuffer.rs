// src/pipeline/framebuffer.rs
//! Framebuffers and the handles passes use to reach each other's outputs.
//!
//! The [`Framebuffers`] registry stores every framebuffer of a pipeline and
//! records which pass owns it. Owners resize their framebuffers; everyone
//! else holds an [`AttachmentRef`] and resolves it to a texture at draw time,
//! so a resize never leaves a stale handle behind.

use std::fmt;

use glam::UVec2;

use crate::error::{Error, Result};
use crate::gpu::{RenderDevice, TextureDesc, TextureFormat, TextureId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attachment {
    Color0,
    Color1,
    Color2,
    Color3,
    Color4,
    Depth,
}

impl Attachment {
    pub const COLORS: [Attachment; 5] = [
        Attachment::Color0,
        Attachment::Color1,
        Attachment::Color2,
        Attachment::Color3,
        Attachment::Color4,
    ];

    pub fn is_depth(self) -> bool {
        self == Attachment::Depth
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

/// Non-owning reference to one attachment of a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentRef {
    pub framebuffer: FramebufferId,
    pub attachment: Attachment,
}

impl AttachmentRef {
    pub fn new(framebuffer: FramebufferId, attachment: Attachment) -> Self {
        Self {
            framebuffer,
            attachment,
        }
    }
}

impl fmt::Display for AttachmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "framebuffer#{}/{:?}", self.framebuffer.0, self.attachment)
    }
}

#[derive(Debug)]
pub struct Framebuffer {
    pub label: String,
    /// Name of the pass that created the framebuffer.
    pub owner: String,
    size: UVec2,
    layout: Vec<(Attachment, TextureFormat)>,
    textures: Vec<(Attachment, TextureId)>,
}

impl Framebuffer {
    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn texture(&self, attachment: Attachment) -> Option<TextureId> {
        self.textures
            .iter()
            .find(|(a, _)| *a == attachment)
            .map(|(_, t)| *t)
    }

    /// Colour attachments in slot order.
    pub fn colors(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.textures
            .iter()
            .filter(|(a, _)| !a.is_depth())
            .map(|(_, t)| *t)
    }

    pub fn depth(&self) -> Option<TextureId> {
        self.texture(Attachment::Depth)
    }

    fn allocate(&mut self, device: &mut dyn RenderDevice) {
        self.textures = self
            .layout
            .iter()
            .map(|&(attachment, format)| {
                let id = device.create_texture(&TextureDesc {
                    label: format!("{}/{attachment:?}", self.label),
                    size: self.size,
                    format,
                    render_target: true,
                });
                (attachment, id)
            })
            .collect();
    }

    fn destroy(&mut self, device: &mut dyn RenderDevice) {
        for (_, texture) in self.textures.drain(..) {
            device.destroy_texture(texture);
        }
    }
}

/// Every framebuffer of one pipeline.
#[derive(Debug, Default)]
pub struct Framebuffers {
    list: Vec<Framebuffer>,
}

impl Framebuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a framebuffer owned by the pass named `owner`.
    pub fn create(
        &mut self,
        device: &mut dyn RenderDevice,
        owner: &str,
        label: &str,
        size: UVec2,
        layout: &[(Attachment, TextureFormat)],
    ) -> FramebufferId {
        let mut framebuffer = Framebuffer {
            label: label.to_string(),
            owner: owner.to_string(),
            size: size.max(UVec2::ONE),
            layout: layout.to_vec(),
            textures: Vec::new(),
        };
        framebuffer.allocate(device);
        log::debug!(
            "Framebuffer {label} ({} attachments) {}x{} for pass {owner}",
            layout.len(),
            framebuffer.size.x,
            framebuffer.size.y
        );
        self.list.push(framebuffer);
        FramebufferId(self.list.len() as u32 - 1)
    }

    pub fn get(&self, id: FramebufferId) -> Result<&Framebuffer> {
        self.list
            .get(id.0 as usize)
            .ok_or_else(|| Error::not_found("framebuffer", format!("#{}", id.0)))
    }

    pub fn owner(&self, id: FramebufferId) -> Option<&str> {
        self.list.get(id.0 as usize).map(|f| f.owner.as_str())
    }

    /// Texture currently backing `attachment`.
    pub fn texture(&self, attachment: AttachmentRef) -> Result<TextureId> {
        self.get(attachment.framebuffer)?
            .texture(attachment.attachment)
            .ok_or_else(|| Error::not_found("attachment", attachment.to_string()))
    }

    /// Destroy and recreate every attachment of `id` at `size`.
    pub fn resize(&mut self, device: &mut dyn RenderDevice, id: FramebufferId, size: UVec2) -> Result<()> {
        let framebuffer = self
            .list
            .get_mut(id.0 as usize)
            .ok_or_else(|| Error::not_found("framebuffer", format!("#{}", id.0)))?;
        let size = size.max(UVec2::ONE);
        if framebuffer.size == size {
            return Ok(());
        }
        framebuffer.destroy(device);
        framebuffer.size = size;
        framebuffer.allocate(device);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FramebufferId, &Framebuffer)> {
        self.list
            .iter()
            .enumerate()
            .map(|(i, f)| (FramebufferId(i as u32), f))
    }

    /// Every live attachment texture.
    pub fn textures(&self) -> Vec<TextureId> {
        self.list
            .iter()
            .flat_map(|f| f.textures.iter().map(|(_, t)| *t))
            .collect()
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        for framebuffer in &mut self.list {
            framebuffer.destroy(device);
        }
        self.list.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessDevice;

    #[test]
    fn test_resize_recreates_textures() {
        let mut device = HeadlessDevice::new(UVec2::new(8, 8));
        let mut framebuffers = Framebuffers::new();
        let id = framebuffers.create(
            &mut device,
            "color",
            "scene",
            UVec2::new(8, 8),
            &[(Attachment::Color0, TextureFormat::Rgba16Float), (Attachment::Depth, TextureFormat::Depth32Float)],
        );
        let color = AttachmentRef::new(id, Attachment::Color0);
        let before = framebuffers.texture(color).unwrap();

        framebuffers.resize(&mut device, id, UVec2::new(4, 2)).unwrap();
        let after = framebuffers.texture(color).unwrap();
        assert_ne!(before, after);
        assert!(!device.texture_alive(before));
        assert_eq!(device.texture_size(after), Some(UVec2::new(4, 2)));
        assert_eq!(device.live_texture_count(), 2);
        assert_eq!(framebuffers.owner(id), Some("color"));
    }

    #[test]
    fn test_missing_attachment_is_resource_error() {
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let mut framebuffers = Framebuffers::new();
        let id = framebuffers.create(&mut device, "p", "only_color", UVec2::ONE, &[(Attachment::Color0, TextureFormat::Rgba8)]);
        let err = framebuffers.texture(AttachmentRef::new(id, Attachment::Depth)).unwrap_err();
        assert!(err.is_resource());
    }
}
