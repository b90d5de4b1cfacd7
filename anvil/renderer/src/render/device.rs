use common::Size;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn full(size: Size) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: size.width as f32,
            height: size.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

/// The fixed shader pair every back-end carries: one textured, one solid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelShader {
    Textured,
    Solid,
}

/// Per-API seam. One implementation per graphics API; the canonical
/// renderer drives whichever device the presented swap chain belongs to.
///
/// `save_state`/`restore_state` cover the full injection discipline:
/// rasterizer, depth/stencil + reference, viewports, render target and
/// depth views, blend state + factors + sample mask, primitive topology,
/// input layout, and the bound texture where the API exposes it. For
/// context-owning APIs (GL), `acquire_context`/`release_context` bracket
/// the frame.
pub trait GraphicsDevice {
    type Texture;
    type Buffer;
    type Pipeline;
    type StateSnapshot;
    type Error: std::error::Error + Send + Sync + 'static;

    fn back_buffer_size(&mut self) -> Size;

    fn create_texture(&mut self, size: Size) -> Result<Self::Texture, Self::Error>;
    fn upload_texture(
        &mut self,
        texture: &mut Self::Texture,
        data: &[u8],
        line_size: u32,
    ) -> Result<(), Self::Error>;

    fn create_vertex_buffer(&mut self, vertices: &[Vertex]) -> Result<Self::Buffer, Self::Error>;

    /// Shared vertex shader, the two pixel shaders, and the sampler, blend,
    /// rasterizer, depth-stencil, and input-layout objects they need.
    fn create_pipeline(&mut self) -> Result<Self::Pipeline, Self::Error>;

    fn acquire_context(&mut self) {}
    fn release_context(&mut self) {}

    fn save_state(&mut self) -> Self::StateSnapshot;
    fn restore_state(&mut self, snapshot: Self::StateSnapshot);

    fn set_viewport(&mut self, viewport: Viewport);

    fn draw(
        &mut self,
        pipeline: &Self::Pipeline,
        shader: PixelShader,
        vertices: &Self::Buffer,
        texture: Option<&Self::Texture>,
        alpha: u8,
    ) -> Result<(), Self::Error>;
}

/// Scoped save/restore around the overlay draw body. Restores on every
/// exit path; skipping any saved item corrupts game rendering, so the
/// snapshot round-trips through the device untouched.
pub struct StateGuard<'a, D: GraphicsDevice> {
    device: &'a mut D,
    snapshot: Option<D::StateSnapshot>,
}

impl<'a, D: GraphicsDevice> StateGuard<'a, D> {
    pub fn new(device: &'a mut D) -> Self {
        device.acquire_context();
        let snapshot = Some(device.save_state());
        Self { device, snapshot }
    }

    pub fn device(&mut self) -> &mut D {
        self.device
    }
}

impl<'a, D: GraphicsDevice> Drop for StateGuard<'a, D> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.device.restore_state(snapshot);
        }
        self.device.release_context();
    }
}
