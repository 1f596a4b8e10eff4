mod layout;
mod stage;
mod version;

pub use layout::{default_filestore_root, WaftLayout};
pub use stage::Stage;
pub use version::{build_versions, enterprise_build_versions, Version};
