use anyhow::Result;
use clap::Parser;
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Fullscreen, WindowBuilder};

use bunnymark_vk::config::Options;
use bunnymark_vk::input::InputEvent;
use bunnymark_vk::platform;
use bunnymark_vk::renderer::Renderer;

const TITLE: &str = "BunnyMark VK";

fn main() -> Result<()> {
    pretty_env_logger::init();

    let options = Options::parse();
    log::info!("{:?}", options);

    let event_loop = EventLoop::new()?;
    let mut builder = WindowBuilder::new()
        .with_title(TITLE)
        .with_inner_size(PhysicalSize::new(options.width, options.height));
    if options.fullscreen {
        builder = builder.with_fullscreen(Some(Fullscreen::Borderless(None)));
    }
    let window = builder.build(&event_loop)?;

    let mut renderer = unsafe { Renderer::new(&window, &options)? };
    let mut failure = None;

    event_loop.run(|event, target| match event {
        Event::WindowEvent {
            event: WindowEvent::RedrawRequested,
            ..
        } if !target.exiting() => match unsafe { renderer.render_frame() } {
            Ok(Some(fps)) => window.set_title(&format!(
                "{} - {} fps, {} bunnies",
                TITLE,
                fps,
                renderer.sprite_count()
            )),
            Ok(None) => {}
            Err(e) => {
                log::error!("Frame failed: {:#}", e);
                failure = Some(e);
                target.exit();
            }
        },
        Event::WindowEvent { event, .. } => match platform::translate(&event) {
            Some(InputEvent::CloseRequested) => target.exit(),
            Some(input) => renderer.handle_input(input),
            None => {}
        },
        // A minimised window sleeps until the next resize
        Event::AboutToWait if !renderer.is_suspended() => {
            window.request_redraw();
        }
        _ => {}
    })?;

    // GPU resources go before the window they present to
    drop(renderer);
    drop(window);

    failure.map_or(Ok(()), Err)
}
