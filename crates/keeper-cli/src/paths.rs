// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use keeper_config::Layout;

pub fn keeper_home() -> Option<PathBuf> {
    // Allow override via KEEPER_HOME for testing
    if let Ok(home) = std::env::var("KEEPER_HOME") {
        return Some(PathBuf::from(home));
    }
    dirs::home_dir().map(|h| h.join(".keeper"))
}

pub fn layout() -> Option<Layout> {
    keeper_home().map(Layout::new)
}
