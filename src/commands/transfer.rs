//! Local↔remote transfer: upload and download.
//!
//! The only builtins that touch the local disk. Arguments mix local and
//! remote paths, so these commands resolve their remote side themselves
//! instead of relying on the runtime's path resolution.

use std::fs as localfs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::Process;
use crate::path;

/// `upload [-r] <local> <remote>` — copy a local file or directory tree
/// into AGFS, creating remote directories as needed.
pub fn upload(process: &mut Process) -> i32 {
    let recursive = process
        .args
        .iter()
        .any(|a| a == "-r" || a == "--recursive");
    let operands: Vec<String> = process
        .args
        .iter()
        .filter(|a| !a.starts_with('-'))
        .cloned()
        .collect();

    if operands.len() < 2 {
        return process.usage("[-r] <local_path> <agfs_path>");
    }
    let local = PathBuf::from(&operands[0]);
    let remote = path::resolve(&operands[1], &process.cwd);

    if local.is_dir() {
        if !recursive {
            process.stderr.write_str(&format!(
                "upload: {}: is a directory (use -r)\n",
                local.display()
            ));
            return 1;
        }
        return upload_dir(process, &local, &remote);
    }
    upload_file(process, &local, &remote)
}

fn upload_file(process: &mut Process, local: &Path, remote: &str) -> i32 {
    let file = match localfs::File::open(local) {
        Ok(file) => file,
        Err(e) => {
            process
                .stderr
                .write_str(&format!("upload: {}: {e}\n", local.display()));
            return 1;
        }
    };
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);

    // Uploading onto a directory drops the file inside it.
    let mut target = remote.to_string();
    if process.fs.is_directory(&target)
        && let Some(name) = local.file_name()
    {
        target = path::join(&target, &name.to_string_lossy());
    }

    // Chunked transfer: the file body streams to the server without being
    // read into memory first.
    match process.fs.write_stream(&target, file) {
        Ok(_) => {
            process.stdout.write_str(&format!(
                "  {} -> {target} ({size} bytes)\n",
                local.display()
            ));
            0
        }
        Err(e) => {
            process.report(&target, &e);
            1
        }
    }
}

fn upload_dir(process: &mut Process, local: &Path, remote: &str) -> i32 {
    let fs = Rc::clone(&process.fs);

    let mut dst_root = remote.to_string();
    if fs.is_directory(&dst_root)
        && let Some(name) = local.file_name()
    {
        dst_root = path::join(&dst_root, &name.to_string_lossy());
    }
    if !fs.is_directory(&dst_root)
        && let Err(e) = fs.mkdir(&dst_root, 0o755)
    {
        process.report(&dst_root, &e);
        return 1;
    }

    let mut status = 0;
    let mut total_files = 0usize;
    let mut total_bytes = 0usize;
    let mut stack = vec![(local.to_path_buf(), dst_root)];

    while let Some((dir, remote_dir)) = stack.pop() {
        let entries = match localfs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                process
                    .stderr
                    .write_str(&format!("upload: {}: {e}\n", dir.display()));
                status = 1;
                continue;
            }
        };

        for entry in entries.flatten() {
            let child = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let remote_child = path::join(&remote_dir, &name);

            if child.is_dir() {
                match fs.mkdir(&remote_child, 0o755) {
                    Ok(_) => stack.push((child, remote_child)),
                    Err(e) => {
                        process.report(&remote_child, &e);
                        status = 1;
                    }
                }
            } else {
                match localfs::read(&child) {
                    Ok(data) => match fs.write(&remote_child, &data) {
                        Ok(_) => {
                            total_files += 1;
                            total_bytes += data.len();
                            process.stdout.write_str(&format!(
                                "  {} -> {remote_child} ({} bytes)\n",
                                child.display(),
                                data.len()
                            ));
                        }
                        Err(e) => {
                            process.report(&remote_child, &e);
                            status = 1;
                        }
                    },
                    Err(e) => {
                        process
                            .stderr
                            .write_str(&format!("upload: {}: {e}\n", child.display()));
                        status = 1;
                    }
                }
            }
        }
    }

    if total_files > 0 {
        process.stdout.write_str(&format!(
            "Uploaded {total_files} files, {total_bytes} bytes total\n"
        ));
    }
    status
}

/// `download [-r] <remote> <local>` — copy a remote file or directory tree
/// onto the local disk.
pub fn download(process: &mut Process) -> i32 {
    let recursive = process
        .args
        .iter()
        .any(|a| a == "-r" || a == "--recursive");
    let operands: Vec<String> = process
        .args
        .iter()
        .filter(|a| !a.starts_with('-'))
        .cloned()
        .collect();

    if operands.len() < 2 {
        return process.usage("[-r] <agfs_path> <local_path>");
    }
    let remote = path::resolve(&operands[0], &process.cwd);
    let local = PathBuf::from(&operands[1]);
    let fs = Rc::clone(&process.fs);

    let info = match fs.stat(&remote) {
        Ok(info) => info,
        Err(e) => {
            process.report(&remote, &e);
            return 1;
        }
    };

    if info.is_dir {
        if !recursive {
            process
                .stderr
                .write_str(&format!("download: {remote}: is a directory (use -r)\n"));
            return 1;
        }
        return download_dir(process, &remote, &local);
    }
    download_file(process, &remote, &local)
}

fn download_file(process: &mut Process, remote: &str, local: &Path) -> i32 {
    let data = match process.fs.cat(remote, 0, -1) {
        Ok(data) => data,
        Err(e) => {
            process.report(remote, &e);
            return 1;
        }
    };

    // Downloading into an existing directory keeps the remote basename.
    let target = if local.is_dir() {
        local.join(path::basename(remote))
    } else {
        local.to_path_buf()
    };

    match localfs::write(&target, &data) {
        Ok(()) => {
            process.stdout.write_str(&format!(
                "  {remote} -> {} ({} bytes)\n",
                target.display(),
                data.len()
            ));
            0
        }
        Err(e) => {
            process
                .stderr
                .write_str(&format!("download: {}: {e}\n", target.display()));
            1
        }
    }
}

fn download_dir(process: &mut Process, remote: &str, local: &Path) -> i32 {
    let fs = Rc::clone(&process.fs);

    let local_root = if local.is_dir() {
        local.join(path::basename(remote))
    } else {
        local.to_path_buf()
    };
    if let Err(e) = localfs::create_dir_all(&local_root) {
        process
            .stderr
            .write_str(&format!("download: {}: {e}\n", local_root.display()));
        return 1;
    }

    let mut status = 0;
    let mut total_files = 0usize;
    let mut total_bytes = 0usize;
    let mut stack = vec![(remote.to_string(), local_root)];

    while let Some((remote_dir, local_dir)) = stack.pop() {
        let entries = match fs.ls(&remote_dir) {
            Ok(entries) => entries,
            Err(e) => {
                process.report(&remote_dir, &e);
                status = 1;
                continue;
            }
        };

        for entry in entries {
            let remote_child = path::join(&remote_dir, &entry.name);
            let local_child = local_dir.join(&entry.name);

            if entry.is_dir {
                match localfs::create_dir_all(&local_child) {
                    Ok(()) => stack.push((remote_child, local_child)),
                    Err(e) => {
                        process.stderr.write_str(&format!(
                            "download: {}: {e}\n",
                            local_child.display()
                        ));
                        status = 1;
                    }
                }
            } else {
                match fs.cat(&remote_child, 0, -1) {
                    Ok(data) => match localfs::write(&local_child, &data) {
                        Ok(()) => {
                            total_files += 1;
                            total_bytes += data.len();
                            process.stdout.write_str(&format!(
                                "  {remote_child} -> {} ({} bytes)\n",
                                local_child.display(),
                                data.len()
                            ));
                        }
                        Err(e) => {
                            process.stderr.write_str(&format!(
                                "download: {}: {e}\n",
                                local_child.display()
                            ));
                            status = 1;
                        }
                    },
                    Err(e) => {
                        process.report(&remote_child, &e);
                        status = 1;
                    }
                }
            }
        }
    }

    if total_files > 0 {
        process.stdout.write_str(&format!(
            "Downloaded {total_files} files, {total_bytes} bytes total\n"
        ));
    }
    status
}
