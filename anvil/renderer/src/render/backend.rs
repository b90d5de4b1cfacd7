use bytes::Bytes;
use common::{OverlayChannel, Size, protocol::FramebufferInfo};
use log::warn;

use crate::{
    indicator::{INDICATOR_HEIGHT, INDICATOR_WIDTH, INDICATOR_X, INDICATOR_Y, IndicatorManager},
    render::device::{GraphicsDevice, PixelShader, StateGuard, Vertex, Viewport},
    rotator::TextureBufferRotator,
};

use common::protocol::IndicatorKind;

/// What the back-end needs to know about the frame being presented.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub browser_showing: bool,
    pub active_channel: OverlayChannel,
    /// Current indicator and its animation alpha, if any.
    pub indicator: Option<(IndicatorKind, u8)>,
    /// GL-style composition: notifications channel drawn underneath the
    /// indicator so browser content can back it.
    pub notifications_under_indicator: bool,
}

struct SizedTexture<D: GraphicsDevice> {
    texture: D::Texture,
    size: Size,
}

struct Resources<D: GraphicsDevice> {
    screen: Size,
    pipeline: D::Pipeline,
    indicator_textures: Vec<Option<SizedTexture<D>>>,
    border_vertices: D::Buffer,
    fill_vertices: D::Buffer,
    notification_vertices: D::Buffer,
    overlay_vertices: D::Buffer,
    rotators: [TextureBufferRotator<Option<SizedTexture<D>>>; OverlayChannel::COUNT],
}

/// The one overlay renderer, generic over the per-API device. Which device
/// gets constructed is decided at first frame from the presented swap
/// chain; from there on everything below is API-agnostic.
pub struct CanonicalRenderer<D: GraphicsDevice> {
    device: D,
    resources: Option<Resources<D>>,
}

fn quad(x: f32, y: f32, width: f32, height: f32) -> [Vertex; 4] {
    let color = [1.0, 1.0, 1.0, 1.0];
    [
        Vertex {
            position: [x, y],
            uv: [0.0, 0.0],
            color,
        },
        Vertex {
            position: [x + width, y],
            uv: [1.0, 0.0],
            color,
        },
        Vertex {
            position: [x, y + height],
            uv: [0.0, 1.0],
            color,
        },
        Vertex {
            position: [x + width, y + height],
            uv: [1.0, 1.0],
            color,
        },
    ]
}

impl<D: GraphicsDevice> CanonicalRenderer<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            resources: None,
        }
    }

    pub fn device(&mut self) -> &mut D {
        &mut self.device
    }

    /// Builds every GPU resource in presentation order. Any failure drops
    /// whatever was created so far and leaves the renderer uninitialized.
    pub fn init(&mut self, indicators: &IndicatorManager) -> Result<Size, D::Error> {
        self.resources = None;

        let screen = self.device.back_buffer_size();

        let mut indicator_textures = Vec::with_capacity(IndicatorKind::IMAGE_COUNT);
        for kind in IndicatorKind::all_images() {
            let Some(image) = indicators.get_image(kind) else {
                indicator_textures.push(None);
                continue;
            };

            let size = Size::new(image.width(), image.height());
            let mut texture = self.device.create_texture(size)?;
            self.device
                .upload_texture(&mut texture, image.pixels(), image.width() * 4)?;
            indicators.reset_image_updated(kind);

            indicator_textures.push(Some(SizedTexture { texture, size }));
        }

        let border = quad(
            (INDICATOR_X - 1) as f32,
            (INDICATOR_Y - 1) as f32,
            (INDICATOR_WIDTH + 2) as f32,
            (INDICATOR_HEIGHT + 2) as f32,
        );
        let border_vertices = self.device.create_vertex_buffer(&border)?;

        let fill = quad(
            INDICATOR_X as f32,
            INDICATOR_Y as f32,
            INDICATOR_WIDTH as f32,
            INDICATOR_HEIGHT as f32,
        );
        let fill_vertices = self.device.create_vertex_buffer(&fill)?;

        let full = quad(0.0, 0.0, screen.width as f32, screen.height as f32);
        let notification_vertices = self.device.create_vertex_buffer(&full)?;
        let overlay_vertices = self.device.create_vertex_buffer(&full)?;

        let pipeline = self.device.create_pipeline()?;

        self.resources = Some(Resources {
            screen,
            pipeline,
            indicator_textures,
            border_vertices,
            fill_vertices,
            notification_vertices,
            overlay_vertices,
            rotators: [
                TextureBufferRotator::new([None, None, None]),
                TextureBufferRotator::new([None, None, None]),
                TextureBufferRotator::new([None, None, None]),
            ],
        });

        Ok(screen)
    }

    pub fn free(&mut self) {
        self.resources = None;
    }

    pub fn initialized(&self) -> bool {
        self.resources.is_some()
    }

    /// Re-uploads bitmaps whose dirty flag is set.
    pub fn update_indicator_textures(&mut self, indicators: &IndicatorManager) {
        let Some(resources) = &mut self.resources else {
            return;
        };

        for kind in IndicatorKind::all_images() {
            if !indicators.image_updated(kind) {
                continue;
            }

            let Some(image) = indicators.get_image(kind) else {
                continue;
            };

            let size = Size::new(image.width(), image.height());
            let entry = &mut resources.indicator_textures[kind as usize];

            let needs_create = entry.as_ref().is_none_or(|existing| existing.size != size);
            if needs_create {
                match self.device.create_texture(size) {
                    Ok(texture) => *entry = Some(SizedTexture { texture, size }),
                    Err(err) => {
                        warn!("[Render]: failed to recreate indicator texture: {err}");
                        continue;
                    }
                }
            }

            if let Some(existing) = entry {
                if let Err(err) = self.device.upload_texture(
                    &mut existing.texture,
                    image.pixels(),
                    image.width() * 4,
                ) {
                    warn!("[Render]: failed to upload indicator texture: {err}");
                    continue;
                }
            }

            indicators.reset_image_updated(kind);
        }
    }

    /// Rotates in a freshly received frame for one channel.
    pub fn update_overlay(&mut self, channel: OverlayChannel, frame: (FramebufferInfo, Bytes)) {
        let Self { device, resources } = self;
        let Some(resources) = resources.as_mut() else {
            return;
        };

        let (info, payload) = frame;
        let size = Size::new(info.width, info.height);

        resources.rotators[channel as usize].buffer(|slot| {
            if slot.as_ref().is_none_or(|existing| existing.size != size) {
                match device.create_texture(size) {
                    Ok(texture) => *slot = Some(SizedTexture { texture, size }),
                    Err(err) => {
                        warn!("[Render]: failed to create overlay texture: {err}");
                        *slot = None;
                        return false;
                    }
                }
            }

            let Some(target) = slot else {
                return false;
            };

            match device.upload_texture(&mut target.texture, &payload, info.line_size) {
                Ok(()) => true,
                Err(err) => {
                    warn!("[Render]: failed to upload overlay frame: {err}");
                    false
                }
            }
        });
    }

    /// Draws the whole overlay for this frame, bracketed by the state
    /// save/restore guard.
    pub fn render_frame(&mut self, ctx: &FrameContext) {
        let Self { device, resources } = self;
        let Some(resources) = resources.as_mut() else {
            return;
        };

        let mut guard = StateGuard::new(device);

        let overlay_drawn = ctx.browser_showing
            && draw_channel(guard.device(), resources, ctx.active_channel, 255);

        // Overlay on top wins; the indicator only shows when the browser
        // is not covering the frame.
        if !overlay_drawn {
            if ctx.notifications_under_indicator {
                draw_channel(
                    guard.device(),
                    resources,
                    OverlayChannel::Notifications,
                    255,
                );
            }

            if let Some((kind, alpha)) = ctx.indicator {
                draw_indicator(guard.device(), resources, kind, alpha);
            }
        }
    }
}

fn draw_channel<D: GraphicsDevice>(
    device: &mut D,
    resources: &mut Resources<D>,
    channel: OverlayChannel,
    alpha: u8,
) -> bool {
    let Resources {
        screen,
        pipeline,
        overlay_vertices,
        rotators,
        ..
    } = resources;

    rotators[channel as usize].draw(|slot| {
        let Some(texture) = slot else {
            return false;
        };

        device.set_viewport(Viewport::full(*screen));
        device
            .draw(
                pipeline,
                PixelShader::Textured,
                overlay_vertices,
                Some(&texture.texture),
                alpha,
            )
            .is_ok()
    })
}

fn draw_indicator<D: GraphicsDevice>(
    device: &mut D,
    resources: &mut Resources<D>,
    kind: IndicatorKind,
    alpha: u8,
) {
    if kind == IndicatorKind::None {
        return;
    }

    let Some(Some(indicator)) = resources.indicator_textures.get(kind as usize) else {
        return;
    };

    // The bar sits in the top-right corner at its own size.
    device.set_viewport(Viewport {
        x: (resources.screen.width.saturating_sub(indicator.size.width)) as f32,
        y: 0.0,
        width: indicator.size.width as f32,
        height: indicator.size.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    });

    if let Err(err) = device.draw(
        &resources.pipeline,
        PixelShader::Textured,
        &resources.notification_vertices,
        Some(&indicator.texture),
        alpha,
    ) {
        warn!("[Render]: indicator draw failed: {err}");
        return;
    }

    // The legacy square indicator gets its own small viewport, border
    // first, fill second.
    device.set_viewport(Viewport {
        x: 0.0,
        y: 0.0,
        width: (INDICATOR_X + INDICATOR_WIDTH + 2) as f32,
        height: (INDICATOR_Y + INDICATOR_HEIGHT + 2) as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    });

    let _ = device.draw(
        &resources.pipeline,
        PixelShader::Solid,
        &resources.border_vertices,
        None,
        alpha,
    );
    let _ = device.draw(
        &resources.pipeline,
        PixelShader::Solid,
        &resources.fill_vertices,
        None,
        alpha,
    );
}
