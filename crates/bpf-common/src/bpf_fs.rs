//! Make sure the BPF file system is available at its conventional location.
//!
//! iotap doesn't pin its maps, but `bpftool` and the kernel itself expect
//! `/sys/fs/bpf` when inspecting a loaded probe.
use std::{fs::DirBuilder, os::unix::fs::DirBuilderExt, path::Path};

use anyhow::{Context, Result, bail};
use procfs::process::{MountInfos, Process};
use sys_mount::{Mount, MountFlags};

const BPF_FS_PATH: &str = "/sys/fs/bpf";
const BPF: &str = "bpf";

#[derive(Debug, PartialEq, Eq)]
enum BpfFsState {
    Missing,
    Mounted,
    WrongType(String),
    Duplicated(usize),
}

/// Classify the mounts found at [`BPF_FS_PATH`], given as `(fs_type, root)` pairs.
fn inspect<'a>(mounts: impl IntoIterator<Item = (&'a str, &'a str)>) -> BpfFsState {
    let mut found = 0;
    for (fs_type, root) in mounts {
        if fs_type != BPF {
            return BpfFsState::WrongType(fs_type.to_string());
        }
        if root == "/" {
            found += 1;
        }
    }
    match found {
        0 => BpfFsState::Missing,
        1 => BpfFsState::Mounted,
        n => BpfFsState::Duplicated(n),
    }
}

/// State of [`BPF_FS_PATH`] according to the mount table.
fn bpf_fs_state(mount_info: &MountInfos) -> BpfFsState {
    let bpf_fs_path = Path::new(BPF_FS_PATH);
    inspect(
        mount_info
            .into_iter()
            .filter(|mount| mount.mount_point == bpf_fs_path)
            .map(|mount| (mount.fs_type.as_str(), mount.root.as_str())),
    )
}

pub fn check_or_mount_bpf_fs() -> Result<()> {
    let p_self = Process::myself().context("Error accessing /proc/self")?;
    let mount_info = p_self
        .mountinfo()
        .context("Error accessing process mount info")?;
    let state = bpf_fs_state(&mount_info);

    match state {
        BpfFsState::Mounted => Ok(()),
        BpfFsState::Missing => mount_bpf_fs(),
        BpfFsState::WrongType(fs_type) => {
            bail!("File system {BPF_FS_PATH} is mounted but with type {fs_type}")
        }
        BpfFsState::Duplicated(count) => {
            bail!("Multiple bpf fs mounts detected on {BPF_FS_PATH}: {count}")
        }
    }
}

fn mount_bpf_fs() -> Result<()> {
    let bpf_fs_path = Path::new(BPF_FS_PATH);

    if !bpf_fs_path.exists() {
        log::debug!("Create '{BPF_FS_PATH}' because is not found");

        DirBuilder::new()
            .mode(0o755)
            .recursive(true)
            .create(BPF_FS_PATH)
            .with_context(|| format!("Error creating {BPF_FS_PATH}"))?;
    }
    if !bpf_fs_path.is_dir() {
        bail!("'{BPF_FS_PATH}' already exists and is not a directory")
    }

    log::debug!("Mount BPF file system");

    Mount::builder()
        .fstype(BPF)
        .flags(MountFlags::empty())
        .mount(BPF, BPF_FS_PATH)
        .context("Failed to mount BPF file system")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use procfs::FromBufRead;

    use super::*;

    fn mount_table(lines: &str) -> MountInfos {
        MountInfos::from_buf_read(lines.as_bytes()).unwrap()
    }

    #[test]
    fn state_from_mount_table() {
        let root = "25 0 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw\n";
        assert_eq!(bpf_fs_state(&mount_table(root)), BpfFsState::Missing);

        let with_bpf = format!(
            "{root}40 25 0:33 / /sys/fs/bpf rw,nosuid,nodev,noexec,relatime shared:14 - bpf bpf rw,mode=700\n"
        );
        assert_eq!(bpf_fs_state(&mount_table(&with_bpf)), BpfFsState::Mounted);

        let wrong = format!("{root}41 25 0:34 / /sys/fs/bpf rw,relatime - tmpfs tmpfs rw\n");
        assert_eq!(
            bpf_fs_state(&mount_table(&wrong)),
            BpfFsState::WrongType("tmpfs".to_string())
        );
    }

    #[test]
    fn nothing_mounted() {
        assert_eq!(inspect([]), BpfFsState::Missing);
    }

    #[test]
    fn single_bpf_mount() {
        assert_eq!(inspect([("bpf", "/")]), BpfFsState::Mounted);
    }

    #[test]
    fn other_file_system_on_the_path() {
        assert_eq!(
            inspect([("tmpfs", "/")]),
            BpfFsState::WrongType("tmpfs".to_string())
        );
    }

    #[test]
    fn stacked_mounts() {
        assert_eq!(
            inspect([("bpf", "/"), ("bpf", "/"), ("bpf", "/nested")]),
            BpfFsState::Duplicated(2)
        );
    }
}
