//! SDL2 preview window
//! Shows sampled frames scaled to the configured height. Enter or closing the
//! window asks the session to stop.

use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::info;

use super::preview::{scale_to_height, Preview, PreviewError, PreviewFrame};

fn sdl_err(e: impl ToString) -> PreviewError {
    PreviewError(e.to_string())
}

pub struct Sdl2Preview {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: sdl2::EventPump,
    height: u32,
    stop: bool,
}

impl Sdl2Preview {
    pub fn new(sdl_context: &sdl2::Sdl, width: u32, height: u32) -> Result<Self, PreviewError> {
        let video_subsystem = sdl_context.video().map_err(sdl_err)?;

        let window = video_subsystem
            .window("camrec: press <Enter> to stop", width, height)
            .position_centered()
            .build()
            .map_err(sdl_err)?;

        let canvas = window.into_canvas().build().map_err(sdl_err)?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl_context.event_pump().map_err(sdl_err)?;

        Ok(Self {
            canvas,
            texture_creator,
            event_pump,
            height,
            stop: false,
        })
    }
}

impl Preview for Sdl2Preview {
    fn show(&mut self, frame: &PreviewFrame) -> Result<(), PreviewError> {
        let image = scale_to_height(frame, self.height)?;
        let (width, height) = image.dimensions();

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
            .map_err(sdl_err)?;

        texture
            .update(None, image.as_raw(), (width * 3) as usize)
            .map_err(sdl_err)?;

        self.canvas.clear();
        self.canvas.copy(&texture, None, None).map_err(sdl_err)?;
        self.canvas.present();

        self.canvas
            .window_mut()
            .set_title(&format!("camrec: frame #: {}", frame.sequence))
            .map_err(sdl_err)?;
        Ok(())
    }

    fn stop_requested(&mut self) -> bool {
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::Return),
                    ..
                } => {
                    info!("Stop requested from preview window");
                    self.stop = true;
                }
                _ => {}
            }
        }
        self.stop
    }

    fn status(&mut self, text: &str) {
        let _ = self.canvas.window_mut().set_title(text);
    }
}
