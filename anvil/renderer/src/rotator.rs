/// Multi-buffered texture rotation with a producing cursor and a drawing
/// cursor. The producing slot is never handed to `draw`, and `draw` stays a
/// no-op until the first successful `buffer` call, so a consumer never sees
/// a half-written or empty texture.
pub struct TextureBufferRotator<T, const N: usize = 3> {
    textures: [T; N],
    buffering: Option<usize>,
    drawing: Option<usize>,
    did_buffer: bool,
}

impl<T, const N: usize> TextureBufferRotator<T, N> {
    pub fn new(textures: [T; N]) -> Self {
        Self {
            textures,
            buffering: None,
            drawing: None,
            did_buffer: false,
        }
    }

    fn next(slot: Option<usize>) -> usize {
        match slot {
            None => 0,
            Some(slot) => (slot + 1) % N,
        }
    }

    pub fn apply(&mut self, mut func: impl FnMut(&mut T)) {
        for texture in &mut self.textures {
            func(texture);
        }
    }

    pub fn reset(&mut self, func: impl FnMut(&mut T)) {
        self.apply(func);

        self.buffering = None;
        self.drawing = None;
        self.did_buffer = false;
    }

    /// Writes the next produce slot through `func`. The draw cursor only
    /// advances onto slots that are not about to be written.
    pub fn buffer(&mut self, mut func: impl FnMut(&mut T) -> bool) -> bool {
        let buffering = self.buffering.unwrap_or(0);
        self.buffering = Some(buffering);

        let next = Self::next(self.drawing);
        if self.did_buffer && next != buffering {
            self.drawing = Some(next);
        }

        if !func(&mut self.textures[buffering]) {
            return false;
        }

        self.did_buffer = true;
        self.buffering = Some(Self::next(self.buffering));
        true
    }

    pub fn draw(&mut self, mut func: impl FnMut(&mut T) -> bool) -> bool {
        let Some(drawing) = self.drawing else {
            return false;
        };

        func(&mut self.textures[drawing])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn draw_is_noop_until_first_buffer() {
        let mut rotator: TextureBufferRotator<u32> = TextureBufferRotator::new([0; 3]);

        assert!(!rotator.draw(|_| true));

        assert!(rotator.buffer(|slot| {
            *slot = 1;
            true
        }));

        // One buffered frame is not yet published for drawing; the cursor
        // advances on the next produce.
        assert!(!rotator.draw(|_| true));

        assert!(rotator.buffer(|slot| {
            *slot = 2;
            true
        }));

        let mut drawn = 0;
        assert!(rotator.draw(|slot| {
            drawn = *slot;
            true
        }));
        assert_eq!(drawn, 1);
    }

    #[test]
    fn failed_buffer_does_not_publish() {
        let mut rotator: TextureBufferRotator<u32> = TextureBufferRotator::new([0; 3]);

        assert!(!rotator.buffer(|_| false));
        assert!(!rotator.draw(|_| true));
    }

    #[test]
    fn drawn_texture_is_never_the_producing_slot() {
        let mut rotator: TextureBufferRotator<u32> = TextureBufferRotator::new([0; 3]);

        for frame in 1..=32u32 {
            assert!(rotator.buffer(|slot| {
                *slot = frame;
                true
            }));

            let producing = rotator.buffering.unwrap();
            if rotator.drawing.is_some() {
                let mut drawn = 0;
                assert!(rotator.draw(|slot| {
                    drawn = *slot;
                    true
                }));

                assert_ne!(rotator.drawing.unwrap(), producing);
                // The drawn contents are one of the two most recent
                // completed frames.
                assert!(drawn == frame || drawn == frame - 1);
            }
        }
    }

    #[test]
    fn reset_clears_cursors() {
        let mut rotator: TextureBufferRotator<u32> = TextureBufferRotator::new([0; 3]);

        assert!(rotator.buffer(|slot| {
            *slot = 7;
            true
        }));
        assert!(rotator.buffer(|slot| {
            *slot = 8;
            true
        }));

        rotator.reset(|slot| *slot = 0);
        assert!(!rotator.draw(|_| true));
    }
}
