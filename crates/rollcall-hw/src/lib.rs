//! rollcall-hw: access to the networked camera and its flash.
//!
//! Both devices are plain HTTP endpoints (ESP32-CAM style): one GET returns
//! a JPEG still, another blinks the flash LED.

pub mod camera;
pub mod flash;
pub mod frame;

pub use camera::{CameraError, FrameSource, HttpCamera};
pub use flash::{Debounce, FlashError, FlashNotifier, FlashTrigger, HttpFlash};
pub use frame::{Frame, FrameError};
