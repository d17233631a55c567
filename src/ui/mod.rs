//! Application shell: section tabs, the mounted panel and text rendering.

pub mod app;
pub mod render;

pub use app::{ClinicApp, Message, Panel, Section};
