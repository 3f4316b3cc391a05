pub mod layering;
pub mod manifest;
pub mod settings;

// Re-export commonly used types
pub use layering::merge_layer;
pub use manifest::{AppManifest, ImportManifest, ProviderManifest, SliceManifest};
pub use settings::Settings;
