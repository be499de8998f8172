#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    PointerDown,
    PointerUp,
    Resized { width: u32, height: u32 },
    CloseRequested,
}
