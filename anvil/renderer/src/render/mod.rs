pub mod backend;
pub mod device;

pub use backend::{CanonicalRenderer, FrameContext};
pub use device::{GraphicsDevice, PixelShader, StateGuard, Vertex, Viewport};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use bytes::Bytes;
    use common::{OverlayChannel, Size, protocol::FramebufferInfo};
    use thiserror::Error;

    use crate::indicator::IndicatorManager;

    use super::*;

    #[derive(Debug, Error)]
    #[error("test device failure")]
    struct TestError;

    /// Counts live GPU objects so leak checks are just counter reads.
    struct LiveCounter(Arc<AtomicUsize>);

    impl LiveCounter {
        fn new(counter: &Arc<AtomicUsize>) -> Self {
            counter.fetch_add(1, Ordering::SeqCst);
            Self(counter.clone())
        }
    }

    impl Drop for LiveCounter {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct TestTexture {
        _live: LiveCounter,
        size: Size,
        uploads: usize,
    }

    struct TestBuffer {
        _live: LiveCounter,
    }

    struct TestPipeline {
        _live: LiveCounter,
    }

    #[derive(Default)]
    struct TestDevice {
        size: Size,
        live: Arc<AtomicUsize>,
        textures_created: usize,
        fail_texture_at: Option<usize>,
        buffers_created: usize,
        fail_buffer_at: Option<usize>,
        fail_pipeline: bool,
        fail_draws: bool,
        saves: usize,
        restores: usize,
        state_depth: i32,
        draws: Vec<(PixelShader, bool, u8)>,
        viewports: Vec<Viewport>,
    }

    impl TestDevice {
        fn new(size: Size) -> Self {
            Self {
                size,
                ..Default::default()
            }
        }
    }

    impl GraphicsDevice for TestDevice {
        type Texture = TestTexture;
        type Buffer = TestBuffer;
        type Pipeline = TestPipeline;
        type StateSnapshot = u32;
        type Error = TestError;

        fn back_buffer_size(&mut self) -> Size {
            self.size
        }

        fn create_texture(&mut self, size: Size) -> Result<TestTexture, TestError> {
            self.textures_created += 1;
            if self.fail_texture_at == Some(self.textures_created) {
                return Err(TestError);
            }

            Ok(TestTexture {
                _live: LiveCounter::new(&self.live),
                size,
                uploads: 0,
            })
        }

        fn upload_texture(
            &mut self,
            texture: &mut TestTexture,
            data: &[u8],
            line_size: u32,
        ) -> Result<(), TestError> {
            assert_eq!(
                data.len(),
                line_size as usize * texture.size.height as usize
            );
            texture.uploads += 1;
            Ok(())
        }

        fn create_vertex_buffer(&mut self, _vertices: &[Vertex]) -> Result<TestBuffer, TestError> {
            self.buffers_created += 1;
            if self.fail_buffer_at == Some(self.buffers_created) {
                return Err(TestError);
            }

            Ok(TestBuffer {
                _live: LiveCounter::new(&self.live),
            })
        }

        fn create_pipeline(&mut self) -> Result<TestPipeline, TestError> {
            if self.fail_pipeline {
                return Err(TestError);
            }

            Ok(TestPipeline {
                _live: LiveCounter::new(&self.live),
            })
        }

        fn save_state(&mut self) -> u32 {
            self.saves += 1;
            self.state_depth += 1;
            self.saves as u32
        }

        fn restore_state(&mut self, snapshot: u32) {
            self.restores += 1;
            self.state_depth -= 1;
            // Restores pair with the matching save, in reverse order.
            assert_eq!(snapshot as usize, self.saves);
        }

        fn set_viewport(&mut self, viewport: Viewport) {
            self.viewports.push(viewport);
        }

        fn draw(
            &mut self,
            _pipeline: &TestPipeline,
            shader: PixelShader,
            _vertices: &TestBuffer,
            texture: Option<&TestTexture>,
            alpha: u8,
        ) -> Result<(), TestError> {
            // Draw calls only happen inside a save/restore bracket.
            assert!(self.state_depth > 0);

            if self.fail_draws {
                return Err(TestError);
            }

            self.draws.push((shader, texture.is_some(), alpha));
            Ok(())
        }
    }

    fn loaded_indicators() -> IndicatorManager {
        let indicators = IndicatorManager::default();
        indicators.load_images().unwrap();
        indicators
    }

    fn frame(info: FramebufferInfo) -> (FramebufferInfo, Bytes) {
        (info, Bytes::from(vec![0u8; info.payload_len()]))
    }

    fn test_info() -> FramebufferInfo {
        FramebufferInfo {
            width: 64,
            height: 32,
            line_size: 256,
        }
    }

    #[test]
    fn init_reports_back_buffer_size() {
        let indicators = loaded_indicators();
        let mut renderer = CanonicalRenderer::new(TestDevice::new(Size::new(1920, 1080)));

        let size = renderer.init(&indicators).unwrap();
        assert_eq!(size, Size::new(1920, 1080));
        assert!(renderer.initialized());
    }

    #[test]
    fn init_failure_releases_everything_created_so_far() {
        let indicators = loaded_indicators();

        let mut device = TestDevice::new(Size::new(1280, 720));
        device.fail_pipeline = true;
        let live = device.live.clone();

        let mut renderer = CanonicalRenderer::new(device);
        assert!(renderer.init(&indicators).is_err());
        assert!(!renderer.initialized());
        assert_eq!(live.load(Ordering::SeqCst), 0);

        // Same for a failure in the middle of texture creation.
        let mut device = TestDevice::new(Size::new(1280, 720));
        device.fail_texture_at = Some(5);
        let live = device.live.clone();

        let mut renderer = CanonicalRenderer::new(device);
        assert!(renderer.init(&indicators).is_err());
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn state_round_trips_even_when_draws_fail() {
        let indicators = loaded_indicators();
        let mut renderer = CanonicalRenderer::new(TestDevice::new(Size::new(1280, 720)));
        renderer.init(&indicators).unwrap();

        renderer.device().fail_draws = true;
        renderer.render_frame(&FrameContext {
            browser_showing: false,
            active_channel: OverlayChannel::Highlighter,
            indicator: Some((common::protocol::IndicatorKind::Capturing, 255)),
            notifications_under_indicator: false,
        });

        let device = renderer.device();
        assert_eq!(device.saves, 1);
        assert_eq!(device.restores, 1);
        assert_eq!(device.state_depth, 0);
    }

    #[test]
    fn overlay_suppresses_indicator_when_visible() {
        let indicators = loaded_indicators();
        let mut renderer = CanonicalRenderer::new(TestDevice::new(Size::new(1280, 720)));
        renderer.init(&indicators).unwrap();

        // Two buffered frames so the rotator has a drawable slot.
        renderer.update_overlay(OverlayChannel::Highlighter, frame(test_info()));
        renderer.update_overlay(OverlayChannel::Highlighter, frame(test_info()));

        renderer.render_frame(&FrameContext {
            browser_showing: true,
            active_channel: OverlayChannel::Highlighter,
            indicator: Some((common::protocol::IndicatorKind::Capturing, 255)),
            notifications_under_indicator: false,
        });

        let device = renderer.device();
        // Exactly one textured draw, nothing solid (no square indicator).
        assert_eq!(device.draws.len(), 1);
        assert_eq!(device.draws[0], (PixelShader::Textured, true, 255));
    }

    #[test]
    fn indicator_draws_when_overlay_has_no_content() {
        let indicators = loaded_indicators();
        let mut renderer = CanonicalRenderer::new(TestDevice::new(Size::new(1280, 720)));
        renderer.init(&indicators).unwrap();

        // Browser visible but no frame ever buffered: draw_overlay reports
        // false and the indicator still shows.
        renderer.render_frame(&FrameContext {
            browser_showing: true,
            active_channel: OverlayChannel::Highlighter,
            indicator: Some((common::protocol::IndicatorKind::Capturing, 200)),
            notifications_under_indicator: false,
        });

        let device = renderer.device();
        let textured: Vec<_> = device
            .draws
            .iter()
            .filter(|(shader, _, _)| *shader == PixelShader::Textured)
            .collect();
        let solid: Vec<_> = device
            .draws
            .iter()
            .filter(|(shader, _, _)| *shader == PixelShader::Solid)
            .collect();

        assert_eq!(textured.len(), 1);
        assert_eq!(textured[0].2, 200);
        // Border and fill of the square indicator.
        assert_eq!(solid.len(), 2);
    }

    #[test]
    fn indicator_bar_sits_top_right() {
        let indicators = loaded_indicators();
        let mut renderer = CanonicalRenderer::new(TestDevice::new(Size::new(1280, 720)));
        renderer.init(&indicators).unwrap();

        renderer.render_frame(&FrameContext {
            browser_showing: false,
            active_channel: OverlayChannel::Highlighter,
            indicator: Some((common::protocol::IndicatorKind::Capturing, 255)),
            notifications_under_indicator: false,
        });

        let image = indicators
            .get_image(common::protocol::IndicatorKind::Capturing)
            .unwrap();
        let device = renderer.device();
        let viewport = device.viewports[0];
        assert_eq!(viewport.x, (1280 - image.width()) as f32);
        assert_eq!(viewport.y, 0.0);
    }

    #[test]
    fn dirty_indicator_bitmaps_reupload() {
        let indicators = loaded_indicators();
        let mut renderer = CanonicalRenderer::new(TestDevice::new(Size::new(1280, 720)));
        renderer.init(&indicators).unwrap();
        assert!(!indicators.image_updated(common::protocol::IndicatorKind::Enabled));

        indicators.set_hotkey_help("CTRL+B".to_owned());
        assert!(indicators.image_updated(common::protocol::IndicatorKind::Enabled));

        renderer.update_indicator_textures(&indicators);
        assert!(!indicators.image_updated(common::protocol::IndicatorKind::Enabled));
    }
}
