use std::{
    array,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use common::protocol::IndicatorKind;
use log::{info, warn};
use thiserror::Error;

// Geometry of the old square indicator, drawn at a fixed offset inside its
// own small viewport.
pub const INDICATOR_X: u32 = 8;
pub const INDICATOR_Y: u32 = 8;
pub const INDICATOR_WIDTH: u32 = 16;
pub const INDICATOR_HEIGHT: u32 = 16;

const INDICATOR_BAR_WIDTH: u32 = 220;
const INDICATOR_BAR_HEIGHT: u32 = 44;
const ICON_SIZE: u32 = 28;
const BADGE_SIZE: u32 = 10;

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("failed to compose bitmap for {0:?}")]
    Compose(IndicatorKind),
}

/// Fully decoded RGBA bitmap. Either absent (logged at composition time) or
/// complete; back-ends never see partial pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RgbaImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width * height * 4) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: [u8; 4]) {
        let x_end = (x + width).min(self.width);
        let y_end = (y + height).min(self.height);

        for row in y.min(self.height)..y_end {
            for col in x.min(self.width)..x_end {
                let offset = ((row * self.width + col) * 4) as usize;
                self.pixels[offset..offset + 4].copy_from_slice(&color);
            }
        }
    }

    pub fn blit(&mut self, source: &RgbaImage, x: u32, y: u32) {
        for row in 0..source.height {
            let Some(dest_row) = y.checked_add(row).filter(|row| *row < self.height) else {
                break;
            };

            for col in 0..source.width {
                let Some(dest_col) = x.checked_add(col).filter(|col| *col < self.width) else {
                    break;
                };

                let src = ((row * source.width + col) * 4) as usize;
                if source.pixels[src + 3] == 0 {
                    continue;
                }

                let dest = ((dest_row * self.width + dest_col) * 4) as usize;
                self.pixels[dest..dest + 4].copy_from_slice(&source.pixels[src..src + 4]);
            }
        }
    }
}

/// Caption/help text rasterization seam. The platform text renderer lives
/// outside this crate; the default renders a deterministic block glyph per
/// character so captions still affect pixels.
pub trait CaptionRenderer: Send + Sync {
    fn render(&self, text: &str) -> Option<RgbaImage>;
}

pub struct BlockCaptionRenderer;

impl CaptionRenderer for BlockCaptionRenderer {
    fn render(&self, text: &str) -> Option<RgbaImage> {
        const GLYPH_WIDTH: u32 = 6;
        const GLYPH_HEIGHT: u32 = 10;

        let count = text.chars().count().min(64) as u32;
        if count == 0 {
            return Some(RgbaImage::new(1, GLYPH_HEIGHT));
        }

        let mut image = RgbaImage::new(count * GLYPH_WIDTH, GLYPH_HEIGHT);
        for (index, character) in text.chars().take(64).enumerate() {
            let shade = 64 + ((character as u32 * 37) % 192) as u8;
            image.fill_rect(
                index as u32 * GLYPH_WIDTH,
                1,
                GLYPH_WIDTH - 1,
                GLYPH_HEIGHT - 2,
                [shade, shade, shade, 255],
            );
        }

        Some(image)
    }
}

fn bar_color(kind: IndicatorKind) -> [u8; 4] {
    use IndicatorKind::*;

    match kind {
        Capturing | Streaming => [0x2e, 0xcc, 0x40, 0xff],
        Enabled | Tutorial => [0x00, 0x74, 0xd9, 0xff],
        Bookmark => [0xff, 0xdc, 0x00, 0xff],
        MicIdle | StreamMicIdle => [0x7f, 0xdb, 0xff, 0xff],
        MicActive | StreamMicActive => [0x01, 0xff, 0x70, 0xff],
        MicMuted | StreamMicMuted => [0xff, 0x41, 0x36, 0xff],
        MicDisconnected | StreamMicDisconnected => [0x85, 0x14, 0x4b, 0xff],
        CacheLimit => [0xff, 0x85, 0x1b, 0xff],
        ClipProcessing | ScreenshotProcessing | ForwardBuffer => [0xb1, 0x0d, 0xc9, 0xff],
        ClipProcessed | ScreenshotSaved => [0x3d, 0x99, 0x70, 0xff],
        StreamStarted => [0x39, 0xcc, 0xcc, 0xff],
        StreamStopped => [0x11, 0x1e, 0x6b, 0xff],
        None => [0, 0, 0, 0],
    }
}

fn has_live_badge(kind: IndicatorKind) -> bool {
    use IndicatorKind::*;

    matches!(
        kind,
        Streaming
            | StreamStarted
            | StreamMicIdle
            | StreamMicActive
            | StreamMicMuted
            | StreamMicDisconnected
    )
}

fn caption_text(kind: IndicatorKind) -> &'static str {
    use IndicatorKind::*;

    match kind {
        Capturing => "CAPTURING",
        Enabled => "ENABLED",
        Bookmark => "BOOKMARK SET",
        MicIdle | StreamMicIdle => "MIC READY",
        MicActive | StreamMicActive => "MIC ON",
        MicMuted | StreamMicMuted => "MIC MUTED",
        MicDisconnected | StreamMicDisconnected => "MIC DISCONNECTED",
        CacheLimit => "OUT OF SPACE",
        ClipProcessing => "PROCESSING CLIP",
        ClipProcessed => "CLIP READY",
        StreamStarted => "STREAM STARTED",
        StreamStopped => "STREAM STOPPED",
        Streaming => "STREAMING",
        ScreenshotSaved => "SCREENSHOT SAVED",
        ScreenshotProcessing => "SAVING SCREENSHOT",
        Tutorial => "PRESS THE HOTKEY TO SAVE",
        ForwardBuffer => "RECORDING AHEAD",
        None => "",
    }
}

/// Owns one immutable bitmap per indicator kind plus a dirty flag so
/// back-ends re-upload textures on demand.
pub struct IndicatorManager {
    images: [Mutex<Option<Arc<RgbaImage>>>; IndicatorKind::IMAGE_COUNT],
    image_updated: [AtomicBool; IndicatorKind::IMAGE_COUNT],
    indicators_disabled: AtomicBool,
    hotkey_help: Mutex<String>,
    forward_buffer_text: Mutex<String>,
    captions: Box<dyn CaptionRenderer>,
}

impl IndicatorManager {
    pub fn new(captions: Box<dyn CaptionRenderer>) -> Self {
        Self {
            images: array::from_fn(|_| Mutex::new(None)),
            image_updated: array::from_fn(|_| AtomicBool::new(false)),
            indicators_disabled: AtomicBool::new(false),
            hotkey_help: Mutex::new(String::new()),
            forward_buffer_text: Mutex::new(String::new()),
            captions,
        }
    }

    /// Composes every bitmap once. Any failed composition aborts; the
    /// renderer then stays dark until reconfigured.
    pub fn load_images(&self) -> Result<(), IndicatorError> {
        for kind in IndicatorKind::all_images() {
            let image = self
                .compose(kind)
                .ok_or(IndicatorError::Compose(kind))
                .inspect_err(|err| warn!("[Indicator]: {err}"))?;

            *self.entry(kind) = Some(Arc::new(image));
            self.image_updated[kind as usize].store(true, Ordering::Release);
        }

        info!("[Indicator]: composed {} bitmaps", IndicatorKind::IMAGE_COUNT);
        Ok(())
    }

    /// Recomposes only the welcome bitmap; called whenever the hotkey table
    /// changes so the displayed help stays accurate.
    pub fn update_images(&self) {
        self.recompose(IndicatorKind::Enabled);
    }

    pub fn set_hotkey_help(&self, help: String) {
        let mut guard = lock(&self.hotkey_help);
        if *guard == help {
            return;
        }
        *guard = help;
        drop(guard);

        self.update_images();
    }

    pub fn update_forward_buffer_text(&self, text: String) {
        *lock(&self.forward_buffer_text) = text;
        self.recompose(IndicatorKind::ForwardBuffer);
    }

    pub fn disable_indicators(&self, disable: bool) {
        self.indicators_disabled.store(disable, Ordering::Release);
    }

    pub fn disabled(&self) -> bool {
        self.indicators_disabled.load(Ordering::Acquire)
    }

    pub fn get_image(&self, kind: IndicatorKind) -> Option<Arc<RgbaImage>> {
        if kind == IndicatorKind::None {
            return None;
        }

        self.entry(kind).clone()
    }

    pub fn image_updated(&self, kind: IndicatorKind) -> bool {
        if kind == IndicatorKind::None {
            return false;
        }

        self.image_updated[kind as usize].load(Ordering::Acquire)
    }

    pub fn reset_image_updated(&self, kind: IndicatorKind) {
        if kind == IndicatorKind::None {
            return;
        }

        self.image_updated[kind as usize].store(false, Ordering::Release);
    }

    fn entry(&self, kind: IndicatorKind) -> std::sync::MutexGuard<'_, Option<Arc<RgbaImage>>> {
        lock(&self.images[kind as usize])
    }

    fn recompose(&self, kind: IndicatorKind) {
        match self.compose(kind) {
            Some(image) => {
                *self.entry(kind) = Some(Arc::new(image));
                self.image_updated[kind as usize].store(true, Ordering::Release);
            }
            None => warn!("[Indicator]: failed to recompose bitmap for {kind:?}"),
        }
    }

    fn compose(&self, kind: IndicatorKind) -> Option<RgbaImage> {
        let mut image = RgbaImage::new(INDICATOR_BAR_WIDTH, INDICATOR_BAR_HEIGHT);

        image.fill_rect(
            0,
            0,
            INDICATOR_BAR_WIDTH,
            INDICATOR_BAR_HEIGHT,
            [0x10, 0x10, 0x10, 0xe0],
        );
        image.fill_rect(4, 8, ICON_SIZE, ICON_SIZE, bar_color(kind));

        if has_live_badge(kind) {
            image.fill_rect(
                INDICATOR_BAR_WIDTH - BADGE_SIZE - 4,
                4,
                BADGE_SIZE,
                BADGE_SIZE,
                [0xff, 0x41, 0x36, 0xff],
            );
        }

        let caption = match kind {
            IndicatorKind::Enabled => {
                let help = lock(&self.hotkey_help);
                if help.is_empty() {
                    caption_text(kind).to_owned()
                } else {
                    format!("{} {}", caption_text(kind), *help)
                }
            }
            IndicatorKind::ForwardBuffer => {
                let text = lock(&self.forward_buffer_text);
                if text.is_empty() {
                    caption_text(kind).to_owned()
                } else {
                    text.clone()
                }
            }
            other => caption_text(other).to_owned(),
        };

        let rendered = self.captions.render(&caption)?;
        image.blit(&rendered, ICON_SIZE + 12, 16);

        Some(image)
    }
}

impl Default for IndicatorManager {
    fn default() -> Self {
        Self::new(Box::new(BlockCaptionRenderer))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// -- Display state

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorAnimation {
    Hide,
    Fadeout,
    PulsateUp,
    PulsateDown,
    Show,
}

const TRANSIENT_TIMEOUT: Duration = Duration::from_millis(3000);
const FADEOUT: Duration = Duration::from_millis(500);
const PULSATE_STEP: Duration = Duration::from_millis(40);

fn is_transient(kind: IndicatorKind) -> bool {
    use IndicatorKind::*;

    matches!(
        kind,
        Bookmark
            | CacheLimit
            | ClipProcessed
            | StreamStarted
            | StreamStopped
            | ScreenshotSaved
            | Enabled
    )
}

fn is_pulsating(kind: IndicatorKind) -> bool {
    use IndicatorKind::*;

    matches!(kind, ClipProcessing | ScreenshotProcessing | ForwardBuffer)
}

/// Tracks the single current indicator. Transient kinds run on a timeout
/// and fall back to whatever continuous kind was active before them.
pub struct IndicatorDisplay {
    current: IndicatorKind,
    continuous: IndicatorKind,
    alpha: u8,
    animation: IndicatorAnimation,
    stop_at: Option<Instant>,
    last_update: Instant,
}

impl IndicatorDisplay {
    pub fn new() -> Self {
        Self {
            current: IndicatorKind::None,
            continuous: IndicatorKind::None,
            alpha: 0,
            animation: IndicatorAnimation::Hide,
            stop_at: None,
            last_update: Instant::now(),
        }
    }

    pub fn current(&self) -> IndicatorKind {
        self.current
    }

    pub fn set(&mut self, kind: IndicatorKind) {
        self.set_at(kind, Instant::now());
    }

    pub fn set_at(&mut self, kind: IndicatorKind, now: Instant) {
        self.current = kind;
        self.alpha = 255;
        self.last_update = now;

        if kind == IndicatorKind::None {
            self.continuous = IndicatorKind::None;
            self.animation = IndicatorAnimation::Hide;
            self.stop_at = None;
            return;
        }

        if is_transient(kind) {
            self.animation = IndicatorAnimation::Show;
            self.stop_at = Some(now + TRANSIENT_TIMEOUT);
        } else {
            self.continuous = kind;
            self.stop_at = None;
            self.animation = if is_pulsating(kind) {
                IndicatorAnimation::PulsateDown
            } else {
                IndicatorAnimation::Show
            };
        }
    }

    pub fn reset(&mut self) {
        self.set(IndicatorKind::None);
    }

    /// Advances the animation clock; returns what to draw this frame.
    pub fn tick(&mut self, now: Instant) -> Option<(IndicatorKind, u8)> {
        if self.current == IndicatorKind::None {
            return None;
        }

        if let Some(stop_at) = self.stop_at {
            let remaining = stop_at.saturating_duration_since(now);
            if remaining.is_zero() {
                let fallback = self.continuous;
                self.set_at(fallback, now);
                return self.tick(now);
            }

            if remaining <= FADEOUT {
                self.animation = IndicatorAnimation::Fadeout;
                self.alpha = ((remaining.as_millis() * 255) / FADEOUT.as_millis()) as u8;
            }
        } else if is_pulsating(self.current) && now.duration_since(self.last_update) >= PULSATE_STEP
        {
            self.last_update = now;
            match self.animation {
                IndicatorAnimation::PulsateDown => {
                    self.alpha = self.alpha.saturating_sub(16);
                    if self.alpha <= 64 {
                        self.animation = IndicatorAnimation::PulsateUp;
                    }
                }
                IndicatorAnimation::PulsateUp => {
                    self.alpha = self.alpha.saturating_add(16).min(255);
                    if self.alpha == 255 {
                        self.animation = IndicatorAnimation::PulsateDown;
                    }
                }
                _ => self.animation = IndicatorAnimation::PulsateDown,
            }
        }

        Some((self.current, self.alpha))
    }
}

impl Default for IndicatorDisplay {
    fn default() -> Self {
        Self::new()
    }
}
