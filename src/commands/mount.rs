//! Plugin lifecycle builtins: mounts, mount, unmount, plugins.

use serde_json::Value;

use super::Process;

/// Config keys whose values are masked in listings.
const SECRET_KEYS: [&str; 3] = ["secret_access_key", "password", "token"];

/// List mounted plugins, Unix `mount`-style:
/// `<plugin> on <path> (plugin: <plugin>, key=value, ...)`.
pub fn mounts(process: &mut Process) -> i32 {
    let mounts = match process.fs.mounts() {
        Ok(mounts) => mounts,
        Err(e) => {
            process.report("/", &e);
            return 1;
        }
    };

    if mounts.is_empty() {
        process.stdout.write_str("No plugins mounted\n");
        return 0;
    }

    for mount in &mounts {
        let mut options = vec![format!("plugin: {}", mount.plugin_name)];
        for (key, value) in &mount.config {
            if SECRET_KEYS.contains(&key.as_str()) {
                options.push(format!("{key}=***"));
                continue;
            }
            let mut rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if rendered.len() > 50 {
                rendered.truncate(47);
                rendered.push_str("...");
            }
            options.push(format!("{key}={rendered}"));
        }
        process.stdout.write_str(&format!(
            "{} on {} ({})\n",
            mount.plugin_name,
            mount.path,
            options.join(", ")
        ));
    }
    0
}

/// `mount <fstype> <path> [key=value ...]` — mount a plugin dynamically.
/// Values parse as JSON scalars where possible, falling back to strings.
pub fn mount(process: &mut Process) -> i32 {
    if process.args.len() < 2 {
        return process.usage("<fstype> <path> [key=value ...]");
    }
    let fstype = process.args[0].clone();
    let target = process.args[1].clone();

    let pairs = process.args[2..].to_vec();
    let mut config = serde_json::Map::new();
    for pair in &pairs {
        match pair.split_once('=') {
            Some((key, raw)) => {
                let value = serde_json::from_str::<Value>(raw)
                    .ok()
                    .filter(|v| v.is_number() || v.is_boolean())
                    .unwrap_or_else(|| Value::String(raw.to_string()));
                config.insert(key.to_string(), value);
            }
            None => {
                process
                    .stderr
                    .write_str(&format!("mount: invalid config argument: '{pair}'\n"));
                return 2;
            }
        }
    }

    match process.fs.mount(&fstype, &target, Value::Object(config)) {
        Ok(message) => {
            if message.is_empty() {
                process
                    .stdout
                    .write_str(&format!("Mounted {fstype} at {target}\n"));
            } else {
                process.stdout.write_str(&format!("{message}\n"));
            }
            0
        }
        Err(e) => {
            process.report(&target, &e);
            1
        }
    }
}

/// `unmount <path>` — unmount the plugin at a path.
pub fn unmount(process: &mut Process) -> i32 {
    let Some(target) = process.args.first().cloned() else {
        return process.usage("<path>");
    };
    match process.fs.unmount(&target) {
        Ok(()) => {
            process
                .stdout
                .write_str(&format!("Unmounted plugin at {target}\n"));
            0
        }
        Err(e) => {
            process.report(&target, &e);
            1
        }
    }
}

/// `plugins [load|unload|list]` — external plugin management. With no
/// arguments, an alias for `mounts`.
pub fn plugins(process: &mut Process) -> i32 {
    let Some(subcommand) = process.args.first().cloned() else {
        return mounts(process);
    };

    match subcommand.as_str() {
        "load" => {
            let Some(uri) = process.args.get(1).cloned() else {
                return process.usage("load <library_path|url|pfs://...>");
            };
            match process.fs.load_plugin(&uri) {
                Ok(result) => {
                    let name = result
                        .get("plugin_name")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");
                    process
                        .stdout
                        .write_str(&format!("Loaded external plugin: {name}\n  Library: {uri}\n"));
                    0
                }
                Err(e) => {
                    process.report(&uri, &e);
                    1
                }
            }
        }
        "unload" => {
            let Some(uri) = process.args.get(1).cloned() else {
                return process.usage("unload <library_path>");
            };
            match process.fs.unload_plugin(&uri) {
                Ok(()) => {
                    process
                        .stdout
                        .write_str(&format!("Unloaded external plugin: {uri}\n"));
                    0
                }
                Err(e) => {
                    process.report(&uri, &e);
                    1
                }
            }
        }
        "list" => match process.fs.list_plugins() {
            Ok(plugins) => {
                if plugins.is_empty() {
                    process.stdout.write_str("No external plugins loaded\n");
                } else {
                    for plugin in &plugins {
                        let line = match plugin {
                            Value::String(s) => s.clone(),
                            Value::Object(map) => map
                                .get("name")
                                .or_else(|| map.get("library"))
                                .and_then(Value::as_str)
                                .map(str::to_string)
                                .unwrap_or_else(|| plugin.to_string()),
                            other => other.to_string(),
                        };
                        process.stdout.write_str(&format!("{line}\n"));
                    }
                }
                0
            }
            Err(e) => {
                process.report("/", &e);
                1
            }
        },
        other => {
            process
                .stderr
                .write_str(&format!("plugins: unknown subcommand: {other}\n"));
            2
        }
    }
}
