//! File I/O: scene snapshots (binary PLY) and image buffers.

pub mod image;
mod ply;

pub use self::image::{buffer_to_rgb_image, load_image, rgb_image_to_buffer, save_image, LoadedImage};
pub use ply::{load_snapshot, read_scene, save_snapshot, write_scene, SnapshotError};
