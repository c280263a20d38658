//! Runtime facade, options and on-disk layout.

mod core;
mod layout;
mod options;

pub use self::core::{ForgeRuntime, ProvisionRequest};
pub use layout::FilesystemLayout;
pub use options::{DEFAULT_HOME_DIR_NAME, ForgeOptions, HOME_ENV, LoggingOptions, default_home_dir};
