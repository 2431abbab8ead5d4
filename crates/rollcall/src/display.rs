//! Preview window, or its absence.

use image::RgbImage;
use minifb::{Key, Window, WindowOptions};
use thiserror::Error;

const WINDOW_TITLE: &str = "Webcam";
const TARGET_FPS: usize = 30;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("preview window: {0}")]
    Window(String),
}

/// What the operator asked for after a frame was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

pub trait Display {
    /// Present `image` and report whether to keep going.
    fn show(&mut self, image: &RgbImage) -> Result<Control, DisplayError>;

    /// Pump window events without a new frame, e.g. while the camera is down.
    fn poll(&mut self) -> Control;
}

/// No window at all. Runs until the process is stopped.
pub struct Headless;

impl Display for Headless {
    fn show(&mut self, _image: &RgbImage) -> Result<Control, DisplayError> {
        Ok(Control::Continue)
    }

    fn poll(&mut self) -> Control {
        Control::Continue
    }
}

/// A minifb window sized to the frames it is given. `q` or closing it quits.
pub struct WindowDisplay {
    window: Option<Window>,
    size: (usize, usize),
    buffer: Vec<u32>,
}

impl WindowDisplay {
    pub fn new() -> Self {
        Self { window: None, size: (0, 0), buffer: Vec::new() }
    }

    fn window_for(&mut self, width: usize, height: usize) -> Result<&mut Window, DisplayError> {
        if self.window.is_none() || self.size != (width, height) {
            let mut window = Window::new(WINDOW_TITLE, width, height, WindowOptions::default())
                .map_err(|e| DisplayError::Window(e.to_string()))?;
            window.set_target_fps(TARGET_FPS);
            tracing::debug!(width, height, "preview window opened");
            self.size = (width, height);
            self.window = Some(window);
        }
        self.window
            .as_mut()
            .ok_or_else(|| DisplayError::Window("window not available".into()))
    }
}

impl Default for WindowDisplay {
    fn default() -> Self {
        Self::new()
    }
}

fn control_for(window: &Window) -> Control {
    if !window.is_open() || window.is_key_down(Key::Q) {
        Control::Quit
    } else {
        Control::Continue
    }
}

impl Display for WindowDisplay {
    fn show(&mut self, image: &RgbImage) -> Result<Control, DisplayError> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        if width == 0 || height == 0 {
            return Ok(self.poll());
        }

        let mut buffer = std::mem::take(&mut self.buffer);
        pack_0rgb(image, &mut buffer);

        let window = self.window_for(width, height)?;
        let result = window
            .update_with_buffer(&buffer, width, height)
            .map_err(|e| DisplayError::Window(e.to_string()));
        let control = control_for(window);
        self.buffer = buffer;

        result.map(|()| control)
    }

    fn poll(&mut self) -> Control {
        match self.window.as_mut() {
            Some(window) => {
                window.update();
                control_for(window)
            }
            None => Control::Continue,
        }
    }
}

/// Pack RGB pixels as minifb's `0RGB` words.
fn pack_0rgb(image: &RgbImage, out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        image
            .pixels()
            .map(|p| (u32::from(p[0]) << 16) | (u32::from(p[1]) << 8) | u32::from(p[2])),
    );
}
