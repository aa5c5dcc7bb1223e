use std::path::{Path, PathBuf};

use plategate_core::config::plategate_root;

pub const DAEMON_LABEL: &str = "dev.plategate.daemon";
pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.plategate/daemon.sock`
pub fn socket_path(home: &Path) -> PathBuf {
    plategate_root(home).join(DAEMON_SOCKET)
}

pub fn data_dir(home: &Path) -> PathBuf {
    plategate_core::store::data_dir_at(home)
}
