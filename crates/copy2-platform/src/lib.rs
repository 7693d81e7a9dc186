mod commands;
mod executable;
mod paths;

pub use commands::HideWindow;
pub use executable::{current_executable, executable_file_name};
pub use paths::{AppPaths, AppPathsError};
