use anyhow::Result;
use vulkanalia::prelude::v1_3::*;
use vulkanalia::window as vk_window;
use winit::event::{ElementState, MouseButton, TouchPhase, WindowEvent};
use winit::window::Window;

use crate::input::InputEvent;

pub trait SurfaceProvider {
    fn required_instance_extensions(&self) -> &'static [&'static vk::ExtensionName];

    // `instance` must enable `required_instance_extensions`
    unsafe fn create_surface(&self, instance: &Instance) -> Result<vk::SurfaceKHR>;

    fn drawable_size(&self) -> (u32, u32);
}

impl SurfaceProvider for Window {
    fn required_instance_extensions(&self) -> &'static [&'static vk::ExtensionName] {
        vk_window::get_required_instance_extensions(self)
    }

    unsafe fn create_surface(&self, instance: &Instance) -> Result<vk::SurfaceKHR> {
        Ok(vk_window::create_surface(instance, self, self)?)
    }

    fn drawable_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }
}

pub fn translate(event: &WindowEvent) -> Option<InputEvent> {
    match event {
        WindowEvent::MouseInput {
            state,
            button: MouseButton::Left,
            ..
        } => Some(match state {
            ElementState::Pressed => InputEvent::PointerDown,
            ElementState::Released => InputEvent::PointerUp,
        }),
        WindowEvent::Touch(touch) => match touch.phase {
            TouchPhase::Started => Some(InputEvent::PointerDown),
            TouchPhase::Ended | TouchPhase::Cancelled => Some(InputEvent::PointerUp),
            TouchPhase::Moved => None,
        },
        WindowEvent::Resized(size) => Some(InputEvent::Resized {
            width: size.width,
            height: size.height,
        }),
        WindowEvent::CloseRequested => Some(InputEvent::CloseRequested),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::{PhysicalPosition, PhysicalSize};
    use winit::event::{DeviceId, Touch};

    fn mouse(state: ElementState, button: MouseButton) -> WindowEvent {
        WindowEvent::MouseInput {
            device_id: unsafe { DeviceId::dummy() },
            state,
            button,
        }
    }

    fn touch(phase: TouchPhase) -> WindowEvent {
        WindowEvent::Touch(Touch {
            device_id: unsafe { DeviceId::dummy() },
            phase,
            location: PhysicalPosition::new(10.0, 10.0),
            force: None,
            id: 0,
        })
    }

    #[test]
    fn left_button_maps_to_pointer() {
        assert_eq!(
            translate(&mouse(ElementState::Pressed, MouseButton::Left)),
            Some(InputEvent::PointerDown)
        );
        assert_eq!(
            translate(&mouse(ElementState::Released, MouseButton::Left)),
            Some(InputEvent::PointerUp)
        );
        assert_eq!(
            translate(&mouse(ElementState::Pressed, MouseButton::Right)),
            None
        );
    }

    #[test]
    fn touches_map_to_pointer() {
        assert_eq!(translate(&touch(TouchPhase::Started)), Some(InputEvent::PointerDown));
        assert_eq!(translate(&touch(TouchPhase::Moved)), None);
        assert_eq!(translate(&touch(TouchPhase::Cancelled)), Some(InputEvent::PointerUp));
    }

    #[test]
    fn window_lifecycle_events_are_forwarded() {
        assert_eq!(
            translate(&WindowEvent::Resized(PhysicalSize::new(640, 480))),
            Some(InputEvent::Resized {
                width: 640,
                height: 480
            })
        );
        assert_eq!(
            translate(&WindowEvent::CloseRequested),
            Some(InputEvent::CloseRequested)
        );
    }
}
