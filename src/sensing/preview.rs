/// A surface that renders the latest camera frame while a session runs.
/// The session closes it during teardown, after the camera is released.
pub trait PreviewSurface: Send {
    fn close(&mut self);
}
