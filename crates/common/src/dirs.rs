/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::path::{Path, PathBuf};

/// On-disk layout under the data root. Everything the server touches is
/// derived from a single `-h` directory.
#[derive(Clone, Debug)]
pub struct CitadelDirs {
    pub home: PathBuf,
    pub data: PathBuf,
    pub messages: PathBuf,
    pub files: PathBuf,
    pub keys: PathBuf,
    pub run: PathBuf,
}

impl CitadelDirs {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        CitadelDirs {
            data: home.join("data"),
            messages: home.join("messages"),
            files: home.join("files"),
            keys: home.join("keys"),
            run: home.clone(),
            home,
        }
    }

    pub fn create_all(&self) -> std::io::Result<()> {
        for dir in [&self.data, &self.messages, &self.files, &self.keys] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> PathBuf {
        self.run.join("citadel.socket")
    }

    pub fn admin_socket_path(&self) -> PathBuf {
        self.run.join("citadel-admin.socket")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.run.join("citserver.pid")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.run.join("citadel.lock")
    }

    pub fn refcount_queue_file(&self) -> PathBuf {
        self.run.join("refcount_adjustments.dat")
    }

    pub fn legacy_control_file(&self) -> PathBuf {
        self.run.join("citadel.control")
    }

    pub fn legacy_network_dir(&self) -> PathBuf {
        self.run.join("network")
    }

    pub fn core_file_hint(&self, pid: u32) -> PathBuf {
        self.run.join(format!("core.{pid}"))
    }

    pub fn tls_key(&self) -> PathBuf {
        self.keys.join("citadel.key")
    }

    pub fn tls_csr(&self) -> PathBuf {
        self.keys.join("citadel.csr")
    }

    pub fn tls_cer(&self) -> PathBuf {
        self.keys.join("citadel.cer")
    }
}

impl AsRef<Path> for CitadelDirs {
    fn as_ref(&self) -> &Path {
        &self.home
    }
}
